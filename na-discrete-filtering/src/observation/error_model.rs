//! Observation error as a fractional function of the observed value.

use nd::{Array, ArrayView, Ix1};

use na_core::{Error, ObservationKind, Result};

/// Fractional observation error: a floor of `threshold` for small values,
/// growing by `factor` per unit above it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorModel {
  threshold: f64,
  factor: f64,
}

impl ErrorModel {
  pub fn new(threshold: f64, factor: f64) -> Result<ErrorModel> {
    if !(threshold > 0.0) || !threshold.is_finite() {
      return Err(Error::configuration(format!("error threshold must be positive, got {}",
                                              threshold)));
    }
    if !(factor >= 0.0) || !factor.is_finite() {
      return Err(Error::configuration(format!("error factor must be non-negative, got {}",
                                              factor)));
    }
    Ok(ErrorModel {
      threshold: threshold,
      factor: factor,
    })
  }

  pub fn for_kind(kind: ObservationKind) -> ErrorModel {
    match kind {
      ObservationKind::GroundPm10 => ErrorModel {
        threshold: 200.0,
        factor: 0.1,
      },
      ObservationKind::ModisAod |
      ObservationKind::ViirsAod => ErrorModel {
        threshold: 0.1,
        factor: 0.3,
      },
    }
  }

  pub fn threshold(&self) -> f64 { self.threshold }
  pub fn factor(&self) -> f64 { self.factor }

  /// Standard deviation of the error of an observed value `v`.
  pub fn error(&self, v: f64) -> f64 {
    if v <= self.threshold {
      self.threshold
    } else {
      self.threshold + (v - self.threshold) * self.factor
    }
  }

  pub fn variance(&self, v: f64) -> f64 {
    let e = self.error(v);
    e * e
  }

  pub fn variances(&self, values: ArrayView<f64, Ix1>) -> Array<f64, Ix1> {
    values.mapv(|v| self.variance(v) )
  }
}
