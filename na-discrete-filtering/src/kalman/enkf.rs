//! Stochastic (perturbed observation) ensemble Kalman filter analysis.
//!
//! The observation operator is a row gather: `H x` is `x[indices]`. With
//! `Xp` the prior perturbations and `U = Xp[indices, :]`,
//!
//! ```text
//! Pf H^T   = (Xp U^T) / (Ne - 1)
//! H Pf H^T = (U U^T) / (Ne - 1)
//! K        = loc_so ∘ Pf H^T  (loc_oo ∘ H Pf H^T + R)^-1
//! ```
//!
//! The products are always formed before dividing by `Ne - 1`, and `K` is
//! obtained from a Cholesky solve of `S K^T = (Pf H^T)^T`, never from an
//! explicit inverse.

use nd::{Array, ArrayView, Ix1, Ix2, Axis};
use nd::linalg::general_mat_mul;
use nla_factorize::solve_spd;
use rand::Rng;
use tracing::{debug, warn};

use na_core::{Error, Result};

use crate::localization::Localization;
use crate::observation::ObservationSet;
use crate::perturb::observation_perturbations;

/// Result of one analysis. `gain` is kept for inspection only.
#[derive(Debug, Clone)]
pub struct Analysis {
  /// `Ns x Ne`
  pub posterior: Array<f64, Ix2>,
  pub prior_mean: Array<f64, Ix1>,
  /// `prior_mean + K (y - H prior_mean)`, without observation noise.
  pub posterior_mean: Array<f64, Ix1>,
  /// `Ns x m`
  pub gain: Array<f64, Ix2>,
  /// `m >= Ne - 1`: the ensemble covariance can't have full rank in
  /// observation space.
  pub rank_deficient: bool,
}

impl Analysis {
  /// `H x` for the given state vector.
  pub fn observe(x: ArrayView<f64, Ix1>, obs: &ObservationSet) -> Array<f64, Ix1> {
    obs.indices().iter().map(|&i| x[i] ).collect()
  }

  /// `x + K (y - H x)` with this analysis' gain, for a mean other than the
  /// ensemble's own (a noise-free mean carried over from earlier stages).
  pub fn update_mean(&self, x: ArrayView<f64, Ix1>, obs: &ObservationSet) -> Array<f64, Ix1> {
    update_mean(self.gain.view(), x, obs)
  }
}

fn update_mean(gain: ArrayView<f64, Ix2>, x: ArrayView<f64, Ix1>,
               obs: &ObservationSet) -> Array<f64, Ix1> {
  let innovation = &obs.values() - &Analysis::observe(x, obs);
  let mut out = x.to_owned();
  for (i, v) in out.iter_mut().enumerate() {
    let mut acc = 0.0;
    for j in 0..innovation.len() {
      acc += gain[[i, j]] * innovation[j];
    }
    *v += acc;
  }
  out
}

/// Updates `prior` (`Ns x Ne`, one column per member) with `obs`.
///
/// With no observations the prior is returned as is. An ensemble of fewer
/// than two members can't estimate a covariance and is rejected as a
/// configuration error; an innovation covariance that isn't positive
/// definite is a numerical error.
pub fn analyze<R>(prior: ArrayView<f64, Ix2>, obs: &ObservationSet,
                  localization: Option<&Localization>,
                  rand: &mut R) -> Result<Analysis>
  where R: Rng + ?Sized,
{
  let (ns, ne) = prior.dim();
  if ne < 2 {
    return Err(Error::configuration(format!("analysis needs at least two members, got {}", ne)));
  }
  let prior_mean = prior.mean_axis(Axis(1))
    .ok_or_else(|| Error::configuration("empty ensemble") )?;

  let m = obs.len();
  if m == 0 {
    return Ok(Analysis {
      posterior: prior.to_owned(),
      posterior_mean: prior_mean.clone(),
      prior_mean: prior_mean,
      gain: Array::zeros((ns, 0)),
      rank_deficient: false,
    });
  }

  if let Some(&bad) = obs.indices().iter().find(|&&i| i >= ns ) {
    return Err(Error::schema("observation index", &[ns], &[bad]));
  }
  if let Some(loc) = localization {
    if loc.state_obs.dim() != (ns, m) {
      let d = loc.state_obs.dim();
      return Err(Error::schema("state/observation taper", &[ns, m], &[d.0, d.1]));
    }
    if loc.obs_obs.dim() != (m, m) {
      let d = loc.obs_obs.dim();
      return Err(Error::schema("observation/observation taper", &[m, m], &[d.0, d.1]));
    }
  }

  let rank_deficient = m + 1 >= ne;
  if rank_deficient {
    warn!(observations = m, members = ne,
          "observation count reaches the ensemble rank; relying on localization");
  }

  let xp = &prior - &prior_mean.view().insert_axis(Axis(1));
  let u = xp.select(Axis(0), obs.indices());
  let denom = (ne - 1) as f64;

  let mut pf_ht = xp.dot(&u.t());
  pf_ht.mapv_inplace(|v| v / denom );
  let mut s = u.dot(&u.t());
  s.mapv_inplace(|v| v / denom );

  if let Some(loc) = localization {
    pf_ht *= &loc.state_obs;
    s *= &loc.obs_obs;
  }

  for (i, &r) in obs.variances().iter().enumerate() {
    s[[i, i]] += r;
  }

  let gain = solve_spd(&s, &pf_ht.t())
    .map_err(|e| Error::numerical(format!("innovation covariance: {}", e)) )?
    .reversed_axes();
  debug!(observations = m, state = ns, "gain computed");

  // d_j = y + eps_j - H x_j
  let mut innovation = observation_perturbations(obs.variances(), ne, rand);
  innovation += &obs.values().insert_axis(Axis(1));
  innovation -= &prior.select(Axis(0), obs.indices());

  let mut posterior = prior.to_owned();
  general_mat_mul(1.0, &gain, &innovation, 1.0, &mut posterior);

  let posterior_mean = update_mean(gain.view(), prior_mean.view(), obs);

  Ok(Analysis {
    posterior: posterior,
    prior_mean: prior_mean,
    posterior_mean: posterior_mean,
    gain: gain,
    rank_deficient: rank_deficient,
  })
}
