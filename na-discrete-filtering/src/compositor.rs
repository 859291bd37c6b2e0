//! Serial chaining of assimilation stages within one cycle.
//!
//! Each stage reduces the working ensemble, analyses it against the fused
//! observations of its kinds and reconstructs the full state; the result is
//! the next stage's prior. Stages perturb their observations independently,
//! which is an approximation when stages observe correlated quantities.

use nd::{Array, Axis, Ix1, Ix3, Ix4};
use nd::parallel::prelude::*;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, info_span, warn};

use na_core::{Error, Grid, ObservationKind, Result};

use crate::diagnostics::{Diagnostics, FitStatistics};
use crate::ensemble::EnsembleField;
use crate::kalman::{analyze, Analysis};
use crate::localization::{Coordinates, LocalizationCache, LocalizationEngine};
use crate::observation::ObservationSet;
use crate::partition::{RatioField, Reduction, DEFAULT_RATIO_CEILING};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

pub const DEFAULT_EPSILON: f64 = 1.0e-9;

/// Screened, mapped observations of one cycle, by kind.
pub type ObservationBundle = BTreeMap<ObservationKind, ObservationSet>;

#[derive(Debug, Clone, PartialEq)]
pub struct StageDescriptor {
  pub name: String,
  /// Fused into a single solve.
  pub kinds: Vec<ObservationKind>,
  pub reduction: Reduction,
  pub localize: bool,
  pub enabled: bool,
}

impl StageDescriptor {
  pub fn new<S: Into<String>>(name: S, kinds: Vec<ObservationKind>,
                              reduction: Reduction) -> StageDescriptor {
    StageDescriptor {
      name: name.into(),
      kinds: kinds,
      reduction: reduction,
      localize: false,
      enabled: true,
    }
  }
  pub fn localized(mut self, localize: bool) -> StageDescriptor {
    self.localize = localize;
    self
  }
  pub fn enabled(mut self, enabled: bool) -> StageDescriptor {
    self.enabled = enabled;
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisSettings {
  /// Floor for reconstructed values that come out non-positive.
  pub epsilon: f64,
  pub ratio_ceiling: f64,
  /// Required when any stage localizes.
  pub localization: Option<LocalizationEngine>,
}

impl Default for AnalysisSettings {
  fn default() -> AnalysisSettings {
    AnalysisSettings {
      epsilon: DEFAULT_EPSILON,
      ratio_ceiling: DEFAULT_RATIO_CEILING,
      localization: None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
  Disabled,
  NoObservations,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageStatus {
  Applied,
  Skipped(SkipReason),
  /// The solve failed; the ensemble was left as the stage found it.
  Failed(String),
}

impl fmt::Display for StageStatus {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      &StageStatus::Applied => f.write_str("applied"),
      &StageStatus::Skipped(SkipReason::Disabled) => f.write_str("skipped (disabled)"),
      &StageStatus::Skipped(SkipReason::NoObservations) => f.write_str("skipped (no observations)"),
      &StageStatus::Failed(ref why) => write!(f, "failed: {}", why),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
  pub name: String,
  pub reduction: Reduction,
  pub status: StageStatus,
  pub observations: usize,
  pub rank_deficient: bool,
  /// Prior and posterior means against this stage's observations.
  pub prior: Option<FitStatistics>,
  pub posterior: Option<FitStatistics>,
}

impl StageReport {
  fn new(stage: &StageDescriptor, status: StageStatus, observations: usize) -> StageReport {
    StageReport {
      name: stage.name.clone(),
      reduction: stage.reduction,
      status: status,
      observations: observations,
      rank_deficient: false,
      prior: None,
      posterior: None,
    }
  }
}

#[derive(Debug, Clone)]
pub struct CycleOutcome {
  pub posterior: EnsembleField,
  pub diagnostics: Diagnostics,
  pub stages: Vec<StageReport>,
}

impl CycleOutcome {
  pub fn failed_stages<'a>(&'a self) -> impl Iterator<Item = &'a StageReport> + 'a {
    self.stages.iter()
      .filter(|s| match s.status { StageStatus::Failed(_) => true, _ => false } )
  }
}

#[derive(Debug, Clone)]
pub struct SequentialCompositor {
  stages: Vec<StageDescriptor>,
  settings: AnalysisSettings,
}

impl SequentialCompositor {
  pub fn new(stages: Vec<StageDescriptor>,
             settings: AnalysisSettings) -> Result<SequentialCompositor> {
    if !(settings.epsilon > 0.0) || !settings.epsilon.is_finite() {
      return Err(Error::configuration(format!("epsilon must be positive, got {}",
                                              settings.epsilon)));
    }
    if !(settings.ratio_ceiling > 0.0) {
      return Err(Error::configuration(format!("ratio ceiling must be positive, got {}",
                                              settings.ratio_ceiling)));
    }

    let mut names = BTreeSet::new();
    for stage in stages.iter() {
      if !names.insert(stage.name.as_str()) {
        return Err(Error::configuration(format!("stage `{}` is listed twice", stage.name)));
      }
      if stage.kinds.is_empty() {
        return Err(Error::configuration(format!("stage `{}` has no observation kinds",
                                                stage.name)));
      }
      if stage.localize && stage.enabled && settings.localization.is_none() {
        return Err(Error::configuration(format!("stage `{}` localizes but no localization \
                                                 is configured",
                                                stage.name)));
      }
    }

    Ok(SequentialCompositor {
      stages: stages,
      settings: settings,
    })
  }

  pub fn stages(&self) -> &[StageDescriptor] { &self.stages[..] }
  pub fn settings(&self) -> &AnalysisSettings { &self.settings }

  /// Kinds some enabled stage consumes.
  pub fn kinds(&self) -> BTreeSet<ObservationKind> {
    self.stages.iter()
      .filter(|s| s.enabled )
      .flat_map(|s| s.kinds.iter().cloned() )
      .collect()
  }

  /// Runs every stage in order on a working copy of `prior`.
  ///
  /// Stage solve failures are recorded in the stage's report and the cycle
  /// goes on; only fatal errors are returned.
  pub fn assimilate<R>(&self, prior: &EnsembleField, grid: &Grid,
                       observations: &ObservationBundle,
                       cache: &mut LocalizationCache,
                       rand: &mut R) -> Result<CycleOutcome>
    where R: Rng + SeedableRng,
  {
    let shape = grid.field_shape();
    if prior.field_shape() != shape {
      let p = prior.field_shape();
      return Err(Error::schema("prior ensemble", &[shape.0, shape.1, shape.2, shape.3],
                               &[p.0, p.1, p.2, p.3]));
    }
    if prior.members() < 2 {
      return Err(Error::configuration(format!("ensemble needs at least two members, got {}",
                                              prior.members())));
    }

    let prior_mean = prior.mean();
    let mut ratios: HashMap<Reduction, RatioField> = HashMap::new();
    let mut working = prior.clone();
    let mut mean = prior_mean.clone();
    let mut reports = Vec::with_capacity(self.stages.len());

    for stage in self.stages.iter() {
      let span = info_span!("stage", name = %stage.name);
      let _enter = span.enter();

      let ratio = ratios.entry(stage.reduction)
        .or_insert_with(|| {
          RatioField::from_mean(stage.reduction, prior_mean.view(), self.settings.ratio_ceiling)
        });
      let report = self.run_stage(stage, &mut working, &mut mean, grid, observations,
                                  ratio, cache, rand)?;
      reports.push(report);
    }

    let diagnostics = Diagnostics {
      prior_mean: prior_mean,
      posterior_mean: mean,
      prior_spread: prior.spread(),
      posterior_spread: working.spread(),
    };

    Ok(CycleOutcome {
      posterior: working,
      diagnostics: diagnostics,
      stages: reports,
    })
  }

  /// `mean` is the noise-free mean, updated with each stage's gain rather
  /// than recomputed from the perturbed members.
  fn run_stage<R>(&self, stage: &StageDescriptor,
                  working: &mut EnsembleField,
                  mean: &mut Array<f64, Ix4>,
                  grid: &Grid,
                  observations: &ObservationBundle,
                  ratio: &RatioField,
                  cache: &mut LocalizationCache,
                  rand: &mut R) -> Result<StageReport>
    where R: Rng + SeedableRng,
  {
    if !stage.enabled {
      info!("stage disabled");
      return Ok(StageReport::new(stage, StageStatus::Skipped(SkipReason::Disabled), 0));
    }

    let fused = ObservationSet::concat(stage.kinds.iter()
                                         .filter_map(|k| observations.get(k) ));
    let m = fused.len();
    if m == 0 {
      info!("no observations; stage skipped");
      return Ok(StageReport::new(stage, StageStatus::Skipped(SkipReason::NoObservations), 0));
    }

    let slabs: Vec<(usize, ObservationSet)> = match stage.reduction {
      Reduction::Layered => {
        (0..grid.levels())
          .map(|l| (l, fused.for_layer(l)) )
          .filter(|&(_, ref set)| !set.is_empty() )
          .collect()
      },
      Reduction::Column | Reduction::Surface => vec![(0, fused)],
    };

    let localization: Vec<_> = slabs.iter()
      .map(|&(_, ref set)| {
        match (stage.localize, self.settings.localization.as_ref()) {
          (true, Some(engine)) => {
            Some(cache.get_or_build(engine,
                                    &Coordinates::mesh(grid.lon(), grid.lat()),
                                    &Coordinates::points(set.lon(), set.lat())))
          },
          _ => None,
        }
      })
      .collect();
    let seeds: Vec<u64> = slabs.iter().map(|_| rand.gen() ).collect();

    let reduced = stage.reduction.reduce_ensemble(working.view());
    debug!(observations = m, slabs = slabs.len(), "solving");

    let solved: Result<Vec<Analysis>> = slabs.par_iter()
      .zip(localization.par_iter())
      .zip(seeds.par_iter())
      .map(|((&(k, ref set), loc), &seed)| {
        let mut rand = R::seed_from_u64(seed);
        analyze(reduced.index_axis(Axis(0), k), set, loc.as_deref(), &mut rand)
      })
      .collect();

    let analyses = match solved {
      Ok(analyses) => analyses,
      Err(e) if e.is_fatal() => return Err(e),
      Err(e) => {
        warn!(error = %e, "stage failed; ensemble left untouched");
        return Ok(StageReport::new(stage, StageStatus::Failed(e.to_string()), m));
      },
    };

    let totals = stage.reduction.totals(mean.view());
    let cells = reduced.len_of(Axis(1));
    let mut posterior = reduced;
    let mut reduced_mean: Array<f64, Ix3> = Array::zeros((totals.len_of(Axis(0)), cells, 1));
    let mut model_prior = Vec::with_capacity(m);
    let mut model_posterior = Vec::with_capacity(m);
    let mut observed = Vec::with_capacity(m);
    for (&(k, ref set), analysis) in slabs.iter().zip(analyses.iter()) {
      posterior.index_axis_mut(Axis(0), k).assign(&analysis.posterior);

      let before: Array<f64, Ix1> = totals.index_axis(Axis(0), k).iter().cloned().collect();
      let after = analysis.update_mean(before.view(), set);
      model_prior.extend(Analysis::observe(before.view(), set).iter().cloned());
      model_posterior.extend(Analysis::observe(after.view(), set).iter().cloned());
      observed.extend(set.values().iter().cloned());
      reduced_mean.index_axis_mut(Axis(0), k).column_mut(0).assign(&after);
    }

    let touched: Vec<usize> = slabs.iter().map(|&(k, _)| k ).collect();
    ratio.reconstruct(posterior.view(), working.view_mut(), self.settings.epsilon, &touched)?;
    ratio.reconstruct(reduced_mean.view(), mean.view_mut().insert_axis(Axis(4)),
                      self.settings.epsilon, &touched)?;

    let observed = Array::from(observed);
    let prior_fit = FitStatistics::new(Array::from(model_prior).view(), observed.view());
    let posterior_fit = FitStatistics::new(Array::from(model_posterior).view(), observed.view());
    info!(observations = m,
          prior_rmse = prior_fit.rmse, posterior_rmse = posterior_fit.rmse,
          "stage applied");

    Ok(StageReport {
      name: stage.name.clone(),
      reduction: stage.reduction,
      status: StageStatus::Applied,
      observations: m,
      rank_deficient: analyses.iter().any(|a| a.rank_deficient ),
      prior: Some(prior_fit),
      posterior: Some(posterior_fit),
    })
  }
}
