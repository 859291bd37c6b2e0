extern crate ndarray as nd;
extern crate na_core;
extern crate na_discrete_filtering as na_df;
extern crate pbr;
extern crate rand;
extern crate rand_distr;
extern crate rand_isaac;
extern crate rayon;
extern crate serde;
extern crate thiserror;
extern crate toml;
extern crate tracing;

use nd::{ArrayView, Ix4, Zip};

use na_core::CycleTime;
use na_df::{CycleOutcome, StageStatus};

pub mod config;
pub mod data;
pub mod progress;
pub mod store;

/// Summary of one cycle of a twin experiment.
#[derive(Clone, Debug, PartialEq)]
pub struct CycleRecord {
  pub time: CycleTime,
  /// RMSE of the prior and posterior means against the truth, over the
  /// whole `[species, level, lat, lon]` field.
  pub prior_error: f64,
  pub posterior_error: f64,
  /// Domain average of the posterior spread.
  pub spread: f64,
  pub applied: usize,
  pub failed: usize,
}

#[derive(Clone, Debug, Default)]
pub struct CycleHistory {
  records: Vec<CycleRecord>,
}
impl CycleHistory {
  pub fn new(cycles: usize) -> CycleHistory {
    CycleHistory {
      records: Vec::with_capacity(cycles),
    }
  }

  pub fn record(&mut self, time: CycleTime, outcome: &CycleOutcome,
                truth: ArrayView<f64, Ix4>) -> &CycleRecord {
    let d = &outcome.diagnostics;
    let applied = outcome.stages.iter()
      .filter(|s| s.status == StageStatus::Applied )
      .count();
    let spread = d.posterior_spread.mean()
      .unwrap_or(0.0);

    self.records.push(CycleRecord {
      time: time,
      prior_error: rmse(d.prior_mean.view(), truth),
      posterior_error: rmse(d.posterior_mean.view(), truth),
      spread: spread,
      applied: applied,
      failed: outcome.failed_stages().count(),
    });
    &self.records[self.records.len() - 1]
  }

  pub fn records(&self) -> &[CycleRecord] { &self.records[..] }
  pub fn len(&self) -> usize { self.records.len() }
  pub fn is_empty(&self) -> bool { self.records.is_empty() }

  /// Cycles whose analysis moved the mean closer to the truth.
  pub fn improved(&self) -> usize {
    self.records.iter()
      .filter(|r| r.posterior_error < r.prior_error )
      .count()
  }
}

fn rmse(a: ArrayView<f64, Ix4>, b: ArrayView<f64, Ix4>) -> f64 {
  if a.len() == 0 {
    return 0.0;
  }
  let mut sq = 0.0;
  Zip::from(&a)
    .and(&b)
    .for_each(|&a, &b| sq += (a - b) * (a - b) );
  (sq / a.len() as f64).sqrt()
}
