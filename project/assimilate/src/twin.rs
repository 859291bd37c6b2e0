//! Observing-system twin experiment: a hidden truth is observed with noise
//! and the ensemble, started from a misplaced first guess, assimilates it.

use nd::{Array, ArrayView, Ix4};
use rand::SeedableRng;
use rand_isaac::Isaac64Rng;
use tracing::{debug, info};

use na_core::{CycleTime, Grid, ObservationKind, Result};
use na_df::KindSettings;
use util::config::Config;
use util::data::{dust_field, perturbed_members, random_plumes, station_observations,
                 swath_observations, transport};
use util::store::{MemorySource, MemoryStore};

use std::collections::{BTreeMap, BTreeSet};

const PLUMES: usize = 3;
const PLUME_AMPLITUDE: f64 = 400.0;
/// Cells per cycle the transport stand-in moves dust east.
const DRIFT: usize = 1;
const DECAY: f64 = 0.97;

pub struct TwinExperiment {
  grid: Grid,
  truth: Array<f64, Ix4>,
  store: MemoryStore,
  source: MemorySource,
  kinds: BTreeMap<ObservationKind, KindSettings>,
  observed: BTreeSet<ObservationKind>,
  stations: usize,
  swath_pixels: usize,
  cloud_fraction: f64,
  rand: Isaac64Rng,
}

impl TwinExperiment {
  /// Seeds the store with the initial ensemble at time 0.
  pub fn new(config: &Config) -> Result<TwinExperiment> {
    let grid = config.grid()?;
    let mut rand = Isaac64Rng::seed_from_u64(config.seed.wrapping_add(1));

    let amplitude = PLUME_AMPLITUDE * config.twin.truth_scale;
    let truth = dust_field(&grid, &random_plumes(&grid, PLUMES, amplitude, &mut rand));
    let first_guess = dust_field(&grid, &random_plumes(&grid, PLUMES, PLUME_AMPLITUDE,
                                                       &mut rand));

    let store = MemoryStore::new();
    let members = perturbed_members(first_guess.view(), config.members,
                                    config.twin.spread, config.seed.wrapping_add(2));
    for (m, field) in members.into_iter().enumerate() {
      store.insert(m, 0, field)?;
    }
    info!(members = config.members, "initial ensemble seeded");

    Ok(TwinExperiment {
      grid: grid,
      truth: truth,
      store: store,
      source: MemorySource::new(),
      kinds: config.kind_settings()?,
      observed: config.compositor()?.kinds(),
      stations: config.twin.stations,
      swath_pixels: config.twin.swath_pixels,
      cloud_fraction: config.twin.cloud_fraction,
      rand: rand,
    })
  }

  pub fn truth(&self) -> ArrayView<f64, Ix4> { self.truth.view() }
  pub fn store(&self) -> &MemoryStore { &self.store }
  pub fn source(&self) -> &MemorySource { &self.source }

  /// Samples the truth for every kind some stage consumes.
  pub fn observe(&mut self, time: CycleTime) -> Result<()> {
    for &kind in self.observed.iter() {
      let settings = self.kinds.get(&kind)
        .cloned()
        .unwrap_or_else(|| KindSettings::default_for(kind) );
      let raw = match kind {
        ObservationKind::GroundPm10 => {
          station_observations(&self.grid, self.truth.view(), self.stations,
                               &settings.error, &mut self.rand)?
        },
        ObservationKind::ModisAod |
        ObservationKind::ViirsAod => {
          swath_observations(&self.grid, self.truth.view(), self.swath_pixels,
                             self.cloud_fraction, &settings.error, &mut self.rand)?
        },
      };
      debug!(%kind, time, rows = raw.len(), "synthesized observations");
      self.source.insert(kind, time, raw)?;
    }
    Ok(())
  }

  /// Moves the truth and every member from `from` to `to`.
  pub fn advance(&mut self, from: CycleTime, to: CycleTime) -> Result<()> {
    transport(self.truth.view_mut(), DRIFT, DECAY);
    self.store.advance(from, to, |_, field| transport(field, DRIFT, DECAY) )?;
    Ok(())
  }
}
