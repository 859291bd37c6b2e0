use nd::{Array, ArrayBase, ArrayView, Ix1, Ix2};
use num_traits::{Float, NumCast, Zero};

use rand::Rng;
use rand_distr::StandardNormal;

use std::ops::{Index, MulAssign};

/// Scale applied along one axis: either one value for every entry or one
/// value per entry.
#[derive(Debug)]
pub enum Diagonal<'a, E>
  where E: 'a,
{
  Single(E),
  Multiple(ArrayView<'a, E, Ix1>)
}
impl<'a, E> Index<usize> for Diagonal<'a, E> {
  type Output = E;
  fn index(&self, idx: usize) -> &E {
    match self {
      &Diagonal::Single(ref e) => e,
      &Diagonal::Multiple(ref v) => &v[idx],
    }
  }
}
impl<'a, E> From<E> for Diagonal<'a, E> {
  fn from(v: E) -> Diagonal<'a, E> {
    Diagonal::Single(v)
  }
}
impl<'a, E> From<ArrayView<'a, E, Ix1>> for Diagonal<'a, E> {
  fn from(v: ArrayView<'a, E, Ix1>) -> Self {
    Diagonal::Multiple(v)
  }
}

/// Elementwise comparison with an absolute tolerance.
pub trait PartialEqWithinTol<Rhs, Tol> {
  fn partial_eq_within_tol(&self, rhs: &Rhs, tol: Tol) -> bool;
}

impl PartialEqWithinTol<f64, f64> for f64 {
  fn partial_eq_within_tol(&self, rhs: &f64, tol: f64) -> bool {
    (self - rhs).abs() <= tol
  }
}
impl<'a, T> PartialEqWithinTol<ArrayView<'a, T, Ix1>, T> for ArrayView<'a, T, Ix1>
  where T: PartialEqWithinTol<T, T> + Copy,
{
  fn partial_eq_within_tol(&self, rhs: &ArrayView<'a, T, Ix1>, tol: T) -> bool {
    self.len() == rhs.len() &&
      self.iter()
        .zip(rhs.iter())
        .all(|(l, r)| l.partial_eq_within_tol(r, tol) )
  }
}

/// Standard normal draws, row `i` scaled by `d[i]`.
pub fn make_2d_randn<E, R>(dim: (usize, usize),
                           d: Diagonal<E>,
                           rand: &mut R) -> Array<E, Ix2>
  where E: Float + MulAssign + Zero + NumCast,
        R: Rng + ?Sized,
{
  let mut r: Array<E, Ix2> =
    ArrayBase::zeros(dim);
  for i in 0..dim.0 {
    for j in 0..dim.1 {
      let z: f64 = rand.sample(StandardNormal);
      r[[i, j]] = NumCast::from(z)
        .unwrap_or_else(E::zero);
      r[[i, j]] *= d[i];
    }
  }

  r
}
