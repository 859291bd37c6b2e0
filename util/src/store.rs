//! In-memory stand-ins for the model's restart files and the observation
//! archive.

use nd::{Array, ArrayView, ArrayViewMut, Ix4};
use tracing::debug;

use na_core::{CycleTime, EnsembleStateStore, Error, ObservationKind,
              ObservationSource, RawObservations, Result};

use std::collections::HashMap;
use std::sync::RwLock;

fn poisoned() -> Error {
  Error::unavailable("store lock poisoned by a panicked writer")
}

/// Member snapshots keyed by `(member, time)`.
#[derive(Debug, Default)]
pub struct MemoryStore {
  snapshots: RwLock<HashMap<(usize, CycleTime), Array<f64, Ix4>>>,
}

impl MemoryStore {
  pub fn new() -> MemoryStore { Default::default() }

  pub fn insert(&self, member: usize, time: CycleTime,
                field: Array<f64, Ix4>) -> Result<()> {
    let mut s = self.snapshots.write().map_err(|_| poisoned() )?;
    s.insert((member, time), field);
    Ok(())
  }

  pub fn len(&self) -> usize {
    self.snapshots.read()
      .map(|s| s.len() )
      .unwrap_or(0)
  }
  pub fn is_empty(&self) -> bool { self.len() == 0 }

  /// Copies every member at `from` to `to`, letting `f` evolve each copy.
  /// Stands in for the transport model between two cycles.
  pub fn advance<F>(&self, from: CycleTime, to: CycleTime, mut f: F) -> Result<usize>
    where F: FnMut(usize, ArrayViewMut<f64, Ix4>),
  {
    let mut s = self.snapshots.write().map_err(|_| poisoned() )?;
    let mut members: Vec<usize> = s.keys()
      .filter(|&&(_, t)| t == from )
      .map(|&(m, _)| m )
      .collect();
    members.sort();

    for &m in members.iter() {
      let mut next = match s.get(&(m, from)) {
        Some(field) => field.clone(),
        None => continue,
      };
      f(m, next.view_mut());
      s.insert((m, to), next);
    }
    debug!(from, to, members = members.len(), "advanced ensemble");
    Ok(members.len())
  }
}

impl EnsembleStateStore for MemoryStore {
  fn read_member(&self, member: usize, time: CycleTime) -> Result<Array<f64, Ix4>> {
    let s = self.snapshots.read().map_err(|_| poisoned() )?;
    s.get(&(member, time))
      .cloned()
      .ok_or_else(|| Error::unavailable(format!("no snapshot for member {} at {}",
                                                member, time)) )
  }

  fn write_member(&self, member: usize, time: CycleTime,
                  field: ArrayView<f64, Ix4>) -> Result<()> {
    self.insert(member, time, field.to_owned())
  }
}

/// Raw observation tables keyed by `(kind, time)`. A missing entry is
/// reported as "nothing for this time".
#[derive(Debug, Default)]
pub struct MemorySource {
  tables: RwLock<HashMap<(ObservationKind, CycleTime), RawObservations>>,
}

impl MemorySource {
  pub fn new() -> MemorySource { Default::default() }

  pub fn insert(&self, kind: ObservationKind, time: CycleTime,
                raw: RawObservations) -> Result<()> {
    let mut t = self.tables.write().map_err(|_| poisoned() )?;
    t.insert((kind, time), raw);
    Ok(())
  }
}

impl ObservationSource for MemorySource {
  fn load(&self, kind: ObservationKind, time: CycleTime) -> Result<Option<RawObservations>> {
    let t = self.tables.read().map_err(|_| poisoned() )?;
    Ok(t.get(&(kind, time)).cloned())
  }
}
