use thiserror::Error;

pub type Result<T> = ::std::result::Result<T, Error>;

/// Every failure the assimilation cycle can produce. `is_fatal` decides
/// whether the cycle is aborted or the failure is absorbed locally.
#[derive(Debug, Error)]
pub enum Error {
  /// Bad configuration: abort the cycle before touching any state.
  #[error("configuration error: {0}")]
  Configuration(String),

  /// A missing member snapshot or observation file. Callers degrade to an
  /// empty observation set or skip the stage.
  #[error("data unavailable: {0}")]
  DataUnavailable(String),

  /// Non-SPD innovation covariance, singular solve, etc. Fatal to the
  /// current stage only.
  #[error("numerical error: {0}")]
  Numerical(String),

  /// The store handed back an array of the wrong shape.
  #[error("schema error: {what}: expected shape {expected:?}, found {found:?}")]
  Schema {
    what: String,
    expected: Vec<usize>,
    found: Vec<usize>,
  },

  #[error("i/o error: {0}")]
  Io(#[from] ::std::io::Error),
}

impl Error {
  pub fn configuration<S: Into<String>>(msg: S) -> Error {
    Error::Configuration(msg.into())
  }
  pub fn numerical<S: Into<String>>(msg: S) -> Error {
    Error::Numerical(msg.into())
  }
  pub fn unavailable<S: Into<String>>(msg: S) -> Error {
    Error::DataUnavailable(msg.into())
  }
  pub fn schema<S: Into<String>>(what: S, expected: &[usize], found: &[usize]) -> Error {
    Error::Schema {
      what: what.into(),
      expected: expected.to_vec(),
      found: found.to_vec(),
    }
  }

  /// Fatal errors abort the whole cycle; the rest are recovered from
  /// locally (empty observation set, skipped stage).
  pub fn is_fatal(&self) -> bool {
    match self {
      &Error::Configuration(_) | &Error::Schema { .. } | &Error::Io(_) => true,
      &Error::DataUnavailable(_) | &Error::Numerical(_) => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fatality() {
    assert!(Error::configuration("groups").is_fatal());
    assert!(Error::schema("member 0", &[1, 2], &[2, 1]).is_fatal());
    assert!(!Error::numerical("not spd").is_fatal());
    assert!(!Error::unavailable("no file").is_fatal());
  }

  #[test]
  fn schema_message_names_shapes() {
    let e = Error::schema("member 3", &[2, 4, 5, 6], &[2, 4, 6, 5]);
    let msg = e.to_string();
    assert!(msg.contains("member 3"));
    assert!(msg.contains("[2, 4, 5, 6]"));
  }
}
