extern crate na_core;
extern crate na_discrete_filtering as na_df;
extern crate ndarray as nd;
extern crate rand;
extern crate rand_isaac;

use na_core::{CycleTime, EnsembleStateStore, Error, Grid, ObservationKind,
              ObservationSource, RawObservations, Result};
use na_df::{AnalysisSettings, CycleRunner, DistanceMetric, ErrorModel, KindSettings,
            LocalizationEngine, MemberGroups, Reduction, SequentialCompositor,
            StageDescriptor, StageStatus};
use nd::{arr1, Array, ArrayView, Ix4};
use rand::SeedableRng;
use rand_isaac::Isaac64Rng;

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

struct Store {
  members: Mutex<HashMap<usize, Array<f64, Ix4>>>,
  writes: Mutex<usize>,
  reject_write: Option<usize>,
}

impl Store {
  fn new(grid: &Grid, members: usize) -> Store {
    let mut m = HashMap::new();
    for e in 0..members {
      let f = Array::from_shape_fn(grid.field_shape(), |(s, l, i, j)| {
        let base = if l == 0 { 40.0 } else { 20.0 };
        base * (1.0 + 0.5 * s as f64) + (i + j) as f64 + 4.0 * e as f64
      });
      m.insert(e, f);
    }
    Store {
      members: Mutex::new(m),
      writes: Mutex::new(0),
      reject_write: None,
    }
  }

  fn mean_surface_total(&self, cell: (usize, usize)) -> f64 {
    let members = self.members.lock().unwrap();
    let total: f64 = members.values()
      .map(|f| f[[0, 0, cell.0, cell.1]] + f[[1, 0, cell.0, cell.1]] )
      .sum();
    total / members.len() as f64
  }
}

impl EnsembleStateStore for Store {
  fn read_member(&self, member: usize, _: CycleTime) -> Result<Array<f64, Ix4>> {
    self.members.lock().unwrap()
      .get(&member)
      .cloned()
      .ok_or_else(|| Error::unavailable(format!("member {}", member)) )
  }
  fn write_member(&self, member: usize, _: CycleTime,
                  field: ArrayView<f64, Ix4>) -> Result<()> {
    if self.reject_write == Some(member) {
      return Err(Error::Io(::std::io::Error::new(::std::io::ErrorKind::Other, "quota")));
    }
    self.members.lock().unwrap().insert(member, field.to_owned());
    *self.writes.lock().unwrap() += 1;
    Ok(())
  }
}

struct Source {
  fail_io: bool,
}

impl ObservationSource for Source {
  fn load(&self, kind: ObservationKind, _: CycleTime) -> Result<Option<RawObservations>> {
    match kind {
      ObservationKind::GroundPm10 => {
        if self.fail_io {
          return Err(Error::Io(::std::io::Error::new(::std::io::ErrorKind::Other, "nfs")));
        }
        RawObservations::new(arr1(&[1.0, 3.0]), arr1(&[1.0, 2.0]), arr1(&[250.0, 260.0]))
          .map(Some)
      },
      ObservationKind::ModisAod => Ok(None),
      ObservationKind::ViirsAod => Err(Error::unavailable("no overpass")),
    }
  }
}

fn grid() -> Grid {
  Grid::regular(0.0, 1.0, 4, 0.0, 1.0, 3, 2, 2).unwrap()
}

fn runner(grid: &Grid, members: usize) -> CycleRunner {
  let settings = AnalysisSettings {
    localization: Some(LocalizationEngine::new(DistanceMetric::GreatCircle, 200.0).unwrap()),
    ..Default::default()
  };
  let stages = vec![
    StageDescriptor::new("satellite", vec![ObservationKind::ModisAod, ObservationKind::ViirsAod],
                         Reduction::Column)
      .localized(true),
    StageDescriptor::new("ground", vec![ObservationKind::GroundPm10], Reduction::Surface)
      .localized(true),
  ];
  let compositor = SequentialCompositor::new(stages, settings).unwrap();
  let mut kinds = BTreeMap::new();
  // tight stations so the update dominates the perturbation noise
  let mut ground = KindSettings::default_for(ObservationKind::GroundPm10);
  ground.error = ErrorModel::new(5.0, 0.0).unwrap();
  kinds.insert(ObservationKind::GroundPm10, ground);
  CycleRunner::new(grid.clone(), MemberGroups::new(vec![2, 4], members).unwrap(),
                   kinds, compositor, 3)
    .unwrap()
}

#[test]
fn cycle_assimilates_and_writes_back() {
  let g = grid();
  let store = Store::new(&g, 6);
  let mut r = runner(&g, 6);
  let before = store.mean_surface_total((1, 1));

  let mut rand = Isaac64Rng::seed_from_u64(2024);
  let outcome = r.run(&store, &Source { fail_io: false }, 0, &mut rand).unwrap();

  assert_eq!(outcome.stages.len(), 2);
  assert!(match outcome.stages[0].status {
    StageStatus::Skipped(_) => true,
    _ => false,
  });
  let ground = &outcome.stages[1];
  assert_eq!(ground.status, StageStatus::Applied);
  assert_eq!(ground.observations, 2);
  assert!(ground.posterior.unwrap().rmse < ground.prior.unwrap().rmse);

  assert_eq!(*store.writes.lock().unwrap(), 6);
  let after = store.mean_surface_total((1, 1));
  assert!(after > before, "{} -> {}", before, after);
  assert!(after < 250.0);

  // only the surface level is reconstructed by a surface stage
  let d = &outcome.diagnostics;
  assert_eq!(d.prior_mean.index_axis(nd::Axis(1), 1),
             d.posterior_mean.index_axis(nd::Axis(1), 1));
  assert!(d.posterior_mean.iter().all(|&v| v > 0.0 ));
  assert!(d.posterior_spread.iter().all(|&v| v >= 0.0 ));
  assert!(r.localization_cache().len() >= 1);
}

#[test]
fn fatal_ingestion_writes_nothing() {
  let g = grid();
  let store = Store::new(&g, 6);
  let mut r = runner(&g, 6);
  let mut rand = Isaac64Rng::seed_from_u64(1);
  let result = r.run(&store, &Source { fail_io: true }, 0, &mut rand);
  assert!(match result { Err(ref e) => e.is_fatal(), Ok(_) => false });
  assert_eq!(*store.writes.lock().unwrap(), 0);
}

#[test]
fn failed_write_back_restores_prior() {
  let g = grid();
  let mut store = Store::new(&g, 6);
  store.reject_write = Some(5);
  let before = store.members.lock().unwrap().clone();
  let mut r = runner(&g, 6);

  let mut rand = Isaac64Rng::seed_from_u64(2024);
  let result = r.run(&store, &Source { fail_io: false }, 0, &mut rand);
  assert!(match result { Err(Error::Io(_)) => true, _ => false });
  assert_eq!(*store.members.lock().unwrap(), before);
}

#[test]
fn bad_member_shape_aborts_cycle() {
  let g = grid();
  let store = Store::new(&g, 6);
  store.members.lock().unwrap().insert(4, Array::zeros((2, 2, 4, 3)));
  let mut r = runner(&g, 6);
  let mut rand = Isaac64Rng::seed_from_u64(1);
  let result = r.run(&store, &Source { fail_io: false }, 0, &mut rand);
  assert!(match result { Err(Error::Schema { .. }) => true, _ => false });
  assert_eq!(*store.writes.lock().unwrap(), 0);
}

#[test]
fn missing_member_is_reported() {
  let g = grid();
  let store = Store::new(&g, 5);
  let mut r = runner(&g, 6);
  let mut rand = Isaac64Rng::seed_from_u64(1);
  let result = r.run(&store, &Source { fail_io: false }, 0, &mut rand);
  assert!(match result { Err(Error::DataUnavailable(_)) => true, _ => false });
  assert_eq!(*store.writes.lock().unwrap(), 0);
}

#[test]
fn member_groups_must_sum_to_ensemble() {
  let r = MemberGroups::new(vec![2, 2], 6);
  assert!(match r { Err(Error::Configuration(_)) => true, _ => false });
}
