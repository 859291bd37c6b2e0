//! Nearest-grid lookup for scattered observations.

use nd::{Array, ArrayView, Ix1, Zip};

use na_core::Grid;

/// Returned for points that fall outside the grid; such observations must
/// be dropped by the caller.
pub const OUTSIDE: isize = -1;

/// Index of the node of `axis` closest to `x`, by binary search.
///
/// `axis` must be ascending. Points outside `[axis[0], axis[n-1]]` (and NaN)
/// have no node. A point exactly halfway between two nodes maps to the lower
/// one.
pub fn nearest_node(axis: ArrayView<f64, Ix1>, x: f64) -> Option<usize> {
  let n = axis.len();
  if n == 0 || !(x >= axis[0] && x <= axis[n - 1]) {
    return None;
  }

  // first node >= x
  let (mut lo, mut hi) = (0, n);
  while lo < hi {
    let mid = lo + (hi - lo) / 2;
    if axis[mid] < x {
      lo = mid + 1;
    } else {
      hi = mid;
    }
  }

  if lo == 0 {
    return Some(0);
  }
  let below = x - axis[lo - 1];
  let above = axis[lo] - x;
  if above < below {
    Some(lo)
  } else {
    Some(lo - 1)
  }
}

#[derive(Debug, Clone, Copy)]
pub struct ObservationMapper<'a> {
  grid: &'a Grid,
}

impl<'a> ObservationMapper<'a> {
  pub fn new(grid: &'a Grid) -> ObservationMapper<'a> {
    ObservationMapper {
      grid: grid,
    }
  }

  pub fn grid(&self) -> &'a Grid { self.grid }

  /// Flattened `lat_idx * nlon + lon_idx`, or [`OUTSIDE`].
  pub fn index_of(&self, lon: f64, lat: f64) -> isize {
    let lon_idx = nearest_node(self.grid.lon(), lon);
    let lat_idx = nearest_node(self.grid.lat(), lat);
    match (lat_idx, lon_idx) {
      (Some(i), Some(j)) => self.grid.flat_index(i, j) as isize,
      _ => OUTSIDE,
    }
  }

  /// Vectorized [`index_of`](Self::index_of). Lon and lat lookups are
  /// independent, so each point costs two binary searches.
  pub fn map(&self, lon: ArrayView<f64, Ix1>,
             lat: ArrayView<f64, Ix1>) -> Array<isize, Ix1> {
    assert_eq!(lon.len(), lat.len());
    let mut out = Array::from_elem(lon.len(), OUTSIDE);
    Zip::from(&mut out)
      .and(&lon)
      .and(&lat)
      .par_for_each(|out, &lon, &lat| {
        *out = self.index_of(lon, lat);
      });
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use nd::arr1;
  use proptest::prelude::*;

  fn grid() -> Grid {
    // lon -10..=10 step 2.5, lat 30..=45 step 5
    Grid::regular(-10.0, 2.5, 9, 30.0, 5.0, 4, 1, 1).unwrap()
  }

  #[test]
  fn exact_node() {
    let g = grid();
    let mapper = ObservationMapper::new(&g);
    assert_eq!(mapper.index_of(-10.0, 30.0), 0);
    assert_eq!(mapper.index_of(-5.0, 35.0), 9 + 2);
    assert_eq!(mapper.index_of(10.0, 45.0), 3 * 9 + 8);
  }

  #[test]
  fn nearest_and_ties() {
    let axis = arr1(&[0.0, 1.0, 2.0, 4.0]);
    assert_eq!(nearest_node(axis.view(), 0.4), Some(0));
    assert_eq!(nearest_node(axis.view(), 0.6), Some(1));
    assert_eq!(nearest_node(axis.view(), 0.5), Some(0));
    assert_eq!(nearest_node(axis.view(), 3.1), Some(3));
    assert_eq!(nearest_node(axis.view(), 3.0), Some(2));
  }

  #[test]
  fn outside_is_sentinel() {
    let g = grid();
    let mapper = ObservationMapper::new(&g);
    assert_eq!(mapper.index_of(-10.01, 35.0), OUTSIDE);
    assert_eq!(mapper.index_of(0.0, 45.5), OUTSIDE);
    assert_eq!(mapper.index_of(::std::f64::NAN, 35.0), OUTSIDE);

    let idx = mapper.map(arr1(&[0.0, 20.0, -7.4]).view(),
                         arr1(&[30.0, 30.0, 44.0]).view());
    assert_eq!(idx, arr1(&[4, OUTSIDE, 3 * 9 + 1]));
  }

  proptest! {
    #[test]
    fn matches_linear_scan(x in -12.0f64..12.0) {
      let g = grid();
      let fast = nearest_node(g.lon(), x);
      let slow = if x < -10.0 || x > 10.0 {
        None
      } else {
        let mut best = 0;
        for (i, &v) in g.lon().iter().enumerate() {
          if (v - x).abs() < (g.lon()[best] - x).abs() {
            best = i;
          }
        }
        Some(best)
      };
      prop_assert_eq!(fast, slow);
    }
  }
}
