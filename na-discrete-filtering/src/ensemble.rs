//! The member tensor and its parallel transfer to and from the state store.

use nd::{Array, ArrayView, ArrayViewMut, Ix4, Ix5, Axis, Slice};
use nd::parallel::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, warn};

use na_core::{CycleTime, EnsembleStateStore, Error, Grid, Result};

use std::ops::Range;

/// `[species, level, lat, lon, member]`
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleField {
  data: Array<f64, Ix5>,
}

impl EnsembleField {
  pub fn new(data: Array<f64, Ix5>) -> Result<EnsembleField> {
    if data.len_of(Axis(4)) == 0 {
      return Err(Error::configuration("an ensemble needs at least one member"));
    }
    Ok(EnsembleField { data: data })
  }
  pub fn zeros(grid: &Grid, members: usize) -> EnsembleField {
    let (s, l, nlat, nlon) = grid.field_shape();
    EnsembleField {
      data: Array::zeros((s, l, nlat, nlon, members)),
    }
  }

  pub fn members(&self) -> usize { self.data.len_of(Axis(4)) }
  /// `[species, level, lat, lon]` of one member.
  pub fn field_shape(&self) -> (usize, usize, usize, usize) {
    let (s, l, nlat, nlon, _) = self.data.dim();
    (s, l, nlat, nlon)
  }

  pub fn view(&self) -> ArrayView<f64, Ix5> { self.data.view() }
  pub fn view_mut(&mut self) -> ArrayViewMut<f64, Ix5> { self.data.view_mut() }
  pub fn into_inner(self) -> Array<f64, Ix5> { self.data }

  pub fn member(&self, i: usize) -> ArrayView<f64, Ix4> {
    self.data.index_axis(Axis(4), i)
  }

  pub fn mean(&self) -> Array<f64, Ix4> {
    self.data.mean_axis(Axis(4))
      .unwrap_or_else(|| Array::zeros(self.field_shape()) )
  }

  /// Sample standard deviation over members (divisor `Ne - 1`); zero with
  /// fewer than two members.
  pub fn spread(&self) -> Array<f64, Ix4> {
    if self.members() < 2 {
      return Array::zeros(self.field_shape());
    }
    self.data.std_axis(Axis(4), 1.0)
  }

  /// Replaces NaN with zero, returning how many were replaced.
  pub fn sanitize(&mut self) -> usize {
    let mut replaced = 0;
    for v in self.data.iter_mut() {
      if v.is_nan() {
        *v = 0.0;
        replaced += 1;
      }
    }
    replaced
  }
}

/// Consecutive member batches; reads proceed one batch at a time. The sizes
/// must add up to the ensemble size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberGroups {
  sizes: Vec<usize>,
}

impl MemberGroups {
  pub fn new(sizes: Vec<usize>, members: usize) -> Result<MemberGroups> {
    let total: usize = sizes.iter().sum();
    if total != members {
      return Err(Error::configuration(format!("member groups {:?} add up to {}, but the \
                                               ensemble has {} members",
                                              sizes, total, members)));
    }
    if sizes.iter().any(|&s| s == 0 ) {
      return Err(Error::configuration("member groups must not be empty"));
    }
    Ok(MemberGroups { sizes: sizes })
  }
  pub fn single(members: usize) -> MemberGroups {
    MemberGroups { sizes: vec![members] }
  }

  pub fn members(&self) -> usize { self.sizes.iter().sum() }
  pub fn sizes(&self) -> &[usize] { &self.sizes[..] }

  pub fn ranges(&self) -> Vec<Range<usize>> {
    let mut start = 0;
    self.sizes.iter()
      .map(|&s| {
        let r = start..start + s;
        start += s;
        r
      })
      .collect()
  }
}

pub fn worker_pool(workers: usize) -> Result<ThreadPool> {
  if workers == 0 {
    return Err(Error::configuration("worker count must be positive"));
  }
  ThreadPoolBuilder::new()
    .num_threads(workers)
    .thread_name(|i| format!("member-io-{}", i) )
    .build()
    .map_err(|e| Error::configuration(format!("can't start worker pool: {}", e)) )
}

/// Reads every member into its own slot of a pre-allocated ensemble; the
/// workers of `pool` each fill disjoint slots. NaN read from the store
/// becomes zero.
pub fn read_ensemble<S>(store: &S, grid: &Grid, groups: &MemberGroups,
                        time: CycleTime, pool: &ThreadPool) -> Result<EnsembleField>
  where S: EnsembleStateStore + ?Sized,
{
  let shape = grid.field_shape();
  let mut ensemble = EnsembleField::zeros(grid, groups.members());

  for range in groups.ranges() {
    let start = range.start;
    debug!(first = range.start, last = range.end, "reading member batch");
    let mut batch = ensemble.data.slice_axis_mut(Axis(4), Slice::from(range));
    pool.install(|| {
      batch.axis_iter_mut(Axis(4))
        .into_par_iter()
        .enumerate()
        .try_for_each(|(k, mut slot)| {
          let member = start + k;
          let field = store.read_member(member, time)?;
          if field.dim() != shape {
            let d = field.dim();
            return Err(Error::schema(format!("member {} state", member),
                                     &[shape.0, shape.1, shape.2, shape.3],
                                     &[d.0, d.1, d.2, d.3]));
          }
          slot.assign(&field);
          Ok(())
        })
    })?;
  }

  let replaced = ensemble.sanitize();
  if replaced > 0 {
    warn!(replaced, "replaced NaN in prior ensemble with zero");
  }
  Ok(ensemble)
}

/// Writes every member of `posterior`. If any write fails, every member is
/// rewritten from `prior` so the store never mixes the two; the first write
/// error is returned.
pub fn write_ensemble<S>(store: &S, posterior: &EnsembleField, prior: &EnsembleField,
                         time: CycleTime, pool: &ThreadPool) -> Result<()>
  where S: EnsembleStateStore + ?Sized,
{
  let written: Vec<Result<()>> = pool.install(|| {
    posterior.data.axis_iter(Axis(4))
      .into_par_iter()
      .enumerate()
      .map(|(member, field)| store.write_member(member, time, field) )
      .collect()
  });

  let failed = written.iter().filter(|r| r.is_err() ).count();
  let first = match written.into_iter().find(|r| r.is_err() ) {
    Some(Err(e)) => e,
    _ => return Ok(()),
  };

  warn!(failed, error = %first, "write-back failed; restoring the prior ensemble");
  let restored: Vec<(usize, Result<()>)> = pool.install(|| {
    prior.data.axis_iter(Axis(4))
      .into_par_iter()
      .enumerate()
      .map(|(member, field)| (member, store.write_member(member, time, field)) )
      .collect()
  });
  for (member, r) in restored {
    if let Err(e) = r {
      warn!(member, error = %e, "can't restore prior member");
    }
  }
  Err(first)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;
  use std::sync::Mutex;

  struct Store {
    shape: (usize, usize, usize, usize),
    written: Mutex<HashMap<usize, Array<f64, Ix4>>>,
    reject: Option<usize>,
  }
  impl EnsembleStateStore for Store {
    fn read_member(&self, member: usize, _: CycleTime) -> Result<Array<f64, Ix4>> {
      let mut f = Array::from_elem(self.shape, member as f64);
      f[[0, 0, 0, 0]] = ::std::f64::NAN;
      Ok(f)
    }
    fn write_member(&self, member: usize, _: CycleTime,
                    field: ArrayView<f64, Ix4>) -> Result<()> {
      if self.reject == Some(member) {
        return Err(Error::Io(::std::io::Error::new(::std::io::ErrorKind::Other, "disk full")));
      }
      self.written.lock().unwrap().insert(member, field.to_owned());
      Ok(())
    }
  }

  fn grid() -> Grid {
    Grid::regular(0.0, 1.0, 3, 0.0, 1.0, 2, 2, 2).unwrap()
  }

  #[test]
  fn groups_must_cover_ensemble() {
    assert!(MemberGroups::new(vec![2, 3], 6).is_err());
    assert!(MemberGroups::new(vec![2, 0, 4], 6).is_err());
    let g = MemberGroups::new(vec![2, 4], 6).unwrap();
    assert_eq!(g.ranges(), vec![0..2, 2..6]);
    assert!(worker_pool(0).is_err());
  }

  #[test]
  fn reads_into_member_slots() {
    let g = grid();
    let store = Store { shape: g.field_shape(), written: Default::default(), reject: None };
    let pool = worker_pool(2).unwrap();
    let groups = MemberGroups::new(vec![1, 3], 4).unwrap();
    let ens = read_ensemble(&store, &g, &groups, 0, &pool).unwrap();
    assert_eq!(ens.members(), 4);
    for m in 0..4 {
      assert_eq!(ens.member(m)[[0, 0, 0, 0]], 0.0);
      assert_eq!(ens.member(m)[[1, 1, 1, 2]], m as f64);
    }
    assert!(ens.view().iter().all(|v| !v.is_nan() ));

    write_ensemble(&store, &ens, &ens, 0, &pool).unwrap();
    let written = store.written.lock().unwrap();
    assert_eq!(written.len(), 4);
    assert_eq!(written[&3][[1, 0, 1, 1]], 3.0);
  }

  #[test]
  fn failed_write_restores_prior() {
    let g = grid();
    let store = Store { shape: g.field_shape(), written: Default::default(), reject: Some(2) };
    let pool = worker_pool(3).unwrap();
    let prior = read_ensemble(&store, &g, &MemberGroups::single(4), 0, &pool).unwrap();
    let mut posterior = prior.clone();
    posterior.view_mut().mapv_inplace(|v| v + 100.0 );

    let r = write_ensemble(&store, &posterior, &prior, 0, &pool);
    assert!(match r { Err(Error::Io(_)) => true, _ => false });
    let written = store.written.lock().unwrap();
    assert_eq!(written.len(), 3);
    for (&m, field) in written.iter() {
      assert_eq!(field.view(), prior.member(m));
    }
  }

  #[test]
  fn shape_mismatch_is_schema_error() {
    let g = grid();
    let store = Store { shape: (2, 2, 2, 2), written: Default::default(), reject: None };
    let pool = worker_pool(1).unwrap();
    let r = read_ensemble(&store, &g, &MemberGroups::single(2), 0, &pool);
    assert!(match r { Err(Error::Schema { .. }) => true, _ => false });
  }

  #[test]
  fn mean_and_spread() {
    let data = Array::from_shape_fn((1, 1, 1, 2, 4), |(_, _, _, j, e)| (j * 10 + e) as f64 );
    let ens = EnsembleField::new(data).unwrap();
    let mean = ens.mean();
    assert_eq!(mean[[0, 0, 0, 0]], 1.5);
    assert_eq!(mean[[0, 0, 0, 1]], 11.5);
    let spread = ens.spread();
    let expected = (5.0f64 / 3.0).sqrt();
    assert!((spread[[0, 0, 0, 1]] - expected).abs() < 1e-12);

    let single = EnsembleField::new(Array::ones((1, 1, 1, 1, 1))).unwrap();
    assert_eq!(single.spread()[[0, 0, 0, 0]], 0.0);
    assert!(EnsembleField::new(Array::zeros((1, 1, 1, 1, 0))).is_err());
  }
}
