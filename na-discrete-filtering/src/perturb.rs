use nd::{Array, ArrayView, Ix1, Ix2};

use rand::Rng;

use crate::utils::{make_2d_randn, Diagonal};

/// Draws one observation-space noise vector per member, `eps ~ N(0, R)` with
/// `R = diag(variances)`. Rows are observations, columns members.
///
/// Every stage perturbs its observations independently; across correlated
/// stages this is a known approximation of the serial filter.
pub fn observation_perturbations<R>(variances: ArrayView<f64, Ix1>,
                                    members: usize,
                                    rand: &mut R) -> Array<f64, Ix2>
  where R: Rng + ?Sized,
{
  let std_dev = variances.mapv(f64::sqrt);
  make_2d_randn((variances.len(), members),
                Diagonal::Multiple(std_dev.view()),
                rand)
}

#[cfg(test)]
mod tests {
  use super::*;
  use nd::{arr1, Axis};
  use rand::SeedableRng;
  use rand_isaac::Isaac64Rng;

  #[test]
  fn perturbation_variance_matches_r() {
    let mut rand = Isaac64Rng::seed_from_u64(11);
    let variances = arr1(&[4.0, 0.01]);
    let eps = observation_perturbations(variances.view(), 20_000, &mut rand);
    assert_eq!(eps.dim(), (2, 20_000));

    let var = eps.var_axis(Axis(1), 1.0);
    assert!((var[0] - 4.0).abs() < 0.2, "var[0] = {}", var[0]);
    assert!((var[1] - 0.01).abs() < 0.0005, "var[1] = {}", var[1]);
  }

  #[test]
  fn no_observations_no_noise() {
    let mut rand = Isaac64Rng::seed_from_u64(1);
    let eps = observation_perturbations(Array::zeros(0).view(), 8, &mut rand);
    assert_eq!(eps.dim(), (0, 8));
  }
}
