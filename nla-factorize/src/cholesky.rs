use nd::{Array, ArrayBase, ArrayView, Data, DataMut,
         Ix2, ScalarOperand};
use num_traits::{Float, ToPrimitive, Zero};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FactorizeError {
  #[error("matrix is not square ({0} x {1})")]
  NotSquare(usize, usize),
  #[error("matrix is not positive definite (pivot {pivot} is {value})")]
  NotPositiveDefinite { pivot: usize, value: f64 },
  #[error("right hand side has {found} rows, expected {expected}")]
  RhsMismatch { expected: usize, found: usize },
}

pub trait Cholesky {
  type RMatrix: Sized;
  /// Returns the upper triangular factor, R, of A = R^*R.
  fn l_lstar(self) -> Result<Self::RMatrix, FactorizeError>;
}

impl<S> Cholesky for ArrayBase<S, Ix2>
  where S: DataMut,
        S::Elem: Float + ScalarOperand,
{
  type RMatrix = ArrayBase<S, Ix2>;

  fn l_lstar(self) -> Result<Self::RMatrix, FactorizeError> {
    let (rows, cols) = self.dim();
    if rows != cols {
      return Err(FactorizeError::NotSquare(rows, cols));
    }
    let m = rows;
    let mut r = self;

    for k in 0..m {
      let pivot = r[[k, k]];
      if !(pivot > S::Elem::zero()) || !pivot.is_finite() {
        return Err(FactorizeError::NotPositiveDefinite {
          pivot: k,
          value: pivot.to_f64().unwrap_or(::std::f64::NAN),
        });
      }

      for j in k + 1..m {
        let t = {
          let t2 = r.slice(s![j, j..]);
          let t4 = r.slice(s![k, j..]);

          &t2 - &(&t4 * (r[[k, j]] / pivot))
        };

        r.slice_mut(s![j, j..])
          .assign(&t);
      }

      let t = pivot.sqrt().recip();
      r.slice_mut(s![k, k..])
        .mapv_inplace(|v| v * t );
    }

    for k in 0..m {
      r.slice_mut(s![k, ..k])
        .fill(S::Elem::zero());
    }

    Ok(r)
  }
}

/// Solves `A X = B` for symmetric positive definite `A` through `A = R^*R`:
/// a forward substitution with `R^*` then a back substitution with `R`.
/// `A` is left untouched; `B` may have any number of columns.
pub fn solve_spd<E, D1, D2>(a: &ArrayBase<D1, Ix2>, b: &ArrayBase<D2, Ix2>)
                            -> Result<Array<E, Ix2>, FactorizeError>
  where D1: Data<Elem = E>,
        D2: Data<Elem = E>,
        E: Float + ScalarOperand,
{
  let r = a.to_owned().l_lstar()?;
  let m = r.dim().0;
  if b.dim().0 != m {
    return Err(FactorizeError::RhsMismatch {
      expected: m,
      found: b.dim().0,
    });
  }

  let mut x = b.to_owned();
  for mut col in x.columns_mut() {
    // R^* z = b
    for i in 0..m {
      let mut acc = col[i];
      for k in 0..i {
        acc = acc - r[[k, i]] * col[k];
      }
      col[i] = acc / r[[i, i]];
    }
    // R x = z
    for i in (0..m).rev() {
      let mut acc = col[i];
      for k in i + 1..m {
        acc = acc - r[[i, k]] * col[k];
      }
      col[i] = acc / r[[i, i]];
    }
  }

  Ok(x)
}

/// `a` is symmetric to within `tol`.
pub fn is_symmetric<E>(a: ArrayView<E, Ix2>, tol: E) -> bool
  where E: Float,
{
  let (rows, cols) = a.dim();
  if rows != cols { return false; }
  for i in 0..rows {
    for j in i + 1..cols {
      if (a[[i, j]] - a[[j, i]]).abs() > tol {
        return false;
      }
    }
  }
  true
}

#[test]
fn cholesky_llstar() {
  use nd::arr2;

  let a = arr2(&[
    [4.0, 12.0, -16.0],
    [12.0, 37.0, -43.0],
    [-16.0, -43.0, 98.0],
  ]);

  let l = a.l_lstar().expect("cholesky factorization failed");

  let expected = arr2(&[
    [2.0, 6.0, -8.0],
    [0.0, 1.0, 5.0],
    [0.0, 0.0, 3.0],
  ]);
  assert_eq!(l, expected);
}

#[test]
fn cholesky_rejects_indefinite() {
  use nd::arr2;

  let a = arr2(&[
    [1.0, 2.0],
    [2.0, 1.0],
  ]);
  match a.l_lstar() {
    Err(FactorizeError::NotPositiveDefinite { pivot, .. }) => assert_eq!(pivot, 1),
    other => panic!("expected failure, got {:?}", other),
  }

  let nan = arr2(&[[::std::f64::NAN]]);
  assert!(nan.l_lstar().is_err());
  assert_eq!(arr2(&[[1.0, 0.0]]).l_lstar(), Err(FactorizeError::NotSquare(1, 2)));
}

#[test]
fn spd_solve() {
  use nd::arr2;

  let a = arr2(&[
    [4.0, 12.0, -16.0],
    [12.0, 37.0, -43.0],
    [-16.0, -43.0, 98.0],
  ]);
  let b = arr2(&[
    [1.0, 0.0],
    [2.0, 1.0],
    [3.0, -1.0],
  ]);
  let x = solve_spd(&a, &b).expect("solve failed");
  let back = a.dot(&x);
  for (l, r) in back.iter().zip(b.iter()) {
    assert!((l - r).abs() < 1e-9, "{} != {}", l, r);
  }

  assert!(is_symmetric(a.view(), 0.0));
  assert!(solve_spd(&a, &arr2(&[[1.0]])).is_err());
}
