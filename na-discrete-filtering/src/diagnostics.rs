//! Fit statistics and cycle level summaries.

use nd::{Array, ArrayView, Ix1, Ix4};

/// Agreement between a model equivalent and the observations it was compared
/// against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitStatistics {
  pub rmse: f64,
  /// `sum(model - obs) / sum(obs)`; NaN when the observations sum to zero.
  pub nmb: f64,
  pub count: usize,
}

impl FitStatistics {
  pub fn new(model: ArrayView<f64, Ix1>, obs: ArrayView<f64, Ix1>) -> FitStatistics {
    assert_eq!(model.len(), obs.len(), "model and observations must pair up");
    let count = obs.len();
    if count == 0 {
      return FitStatistics {
        rmse: ::std::f64::NAN,
        nmb: ::std::f64::NAN,
        count: 0,
      };
    }

    let mut sq = 0.0;
    let mut bias = 0.0;
    let mut total = 0.0;
    for (&m, &o) in model.iter().zip(obs.iter()) {
      let d = m - o;
      sq += d * d;
      bias += d;
      total += o;
    }
    let nmb = if total != 0.0 { bias / total } else { ::std::f64::NAN };

    FitStatistics {
      rmse: (sq / count as f64).sqrt(),
      nmb: nmb,
      count: count,
    }
  }
}

/// Mean and spread of the cycle's prior and posterior, `[species, level,
/// lat, lon]` each. The posterior mean is the gain applied to the prior
/// mean, free of observation perturbation noise.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostics {
  pub prior_mean: Array<f64, Ix4>,
  pub posterior_mean: Array<f64, Ix4>,
  pub prior_spread: Array<f64, Ix4>,
  pub posterior_spread: Array<f64, Ix4>,
}
