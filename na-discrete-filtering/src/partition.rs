//! Reduction of the full `[species, level, lat, lon]` state to the quantity
//! observations actually see, and the ratio field that spreads an analysed
//! total back over species and levels.
//!
//! A reduced ensemble is laid out `[slab, cell, member]`: `cell` is the
//! flattened horizontal index and `slab` is the level for layered stages
//! (a single slab otherwise). Each slab is then directly the `Ns x Ne`
//! ensemble matrix one analysis operates on.

use nd::{Array, ArrayView, ArrayViewMut, Ix3, Ix4, Ix5, Axis, Zip};

use na_core::{Error, Result};

use std::ops::Range;

pub const DEFAULT_RATIO_CEILING: f64 = 9.0;

/// Which part of the state a stage's observations constrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reduction {
  /// Total over species and levels; e.g. optical depth.
  Column,
  /// Total over species at the lowest level only; only that level is
  /// reconstructed.
  Surface,
  /// Total over species, one slab (and one solve) per level.
  Layered,
}

impl Reduction {
  pub fn slabs(&self, levels: usize) -> usize {
    match self {
      &Reduction::Layered => levels,
      &Reduction::Column | &Reduction::Surface => 1,
    }
  }

  /// Full-state levels written back from reduced slab `slab`.
  pub fn levels_of(&self, slab: usize, levels: usize) -> Range<usize> {
    match self {
      &Reduction::Column => 0..levels,
      &Reduction::Surface => 0..1,
      &Reduction::Layered => slab..slab + 1,
    }
  }

  /// `[species, level, lat, lon, member]` to `[slab, cell, member]`.
  pub fn reduce_ensemble(&self, ensemble: ArrayView<f64, Ix5>) -> Array<f64, Ix3> {
    let by_level = ensemble.sum_axis(Axis(0));
    let (levels, nlat, nlon, ne) = by_level.dim();
    let cells = nlat * nlon;
    match self {
      &Reduction::Column => {
        let total = by_level.sum_axis(Axis(0));
        Array::from_shape_fn((1, cells, ne), |(_, c, e)| total[[c / nlon, c % nlon, e]] )
      },
      &Reduction::Surface => {
        Array::from_shape_fn((1, cells, ne), |(_, c, e)| by_level[[0, c / nlon, c % nlon, e]] )
      },
      &Reduction::Layered => {
        Array::from_shape_fn((levels, cells, ne), |(k, c, e)| {
          by_level[[k, c / nlon, c % nlon, e]]
        })
      },
    }
  }

  /// Per-cell partition totals of a mean field, `[slab, lat, lon]`.
  pub fn totals(&self, mean: ArrayView<f64, Ix4>) -> Array<f64, Ix3> {
    let by_level = mean.sum_axis(Axis(0));
    match self {
      &Reduction::Column => by_level.sum_axis(Axis(0)).insert_axis(Axis(0)),
      &Reduction::Surface => by_level.index_axis(Axis(0), 0).to_owned().insert_axis(Axis(0)),
      &Reduction::Layered => by_level,
    }
  }
}

/// Values that aren't strictly positive (NaN included) become `epsilon`.
#[inline]
pub fn kill_negative(v: f64, epsilon: f64) -> f64 {
  if v > 0.0 { v } else { epsilon }
}

/// Fraction of each partition total carried by each species/level cell of the
/// prior mean. Computed once per cycle and reduction.
#[derive(Debug, Clone, PartialEq)]
pub struct RatioField {
  reduction: Reduction,
  ceiling: f64,
  /// `[species, level, lat, lon]`
  ratio: Array<f64, Ix4>,
}

impl RatioField {
  pub fn from_mean(reduction: Reduction, mean: ArrayView<f64, Ix4>,
                   ceiling: f64) -> RatioField {
    let totals = reduction.totals(mean.view());
    let ratio = Array::from_shape_fn(mean.dim(), |(s, l, i, j)| {
      let total = match reduction {
        Reduction::Surface if l != 0 => return 0.0,
        Reduction::Column | Reduction::Surface => totals[[0, i, j]],
        Reduction::Layered => totals[[l, i, j]],
      };
      let r = mean[[s, l, i, j]] / total;
      if r.is_finite() { r.min(ceiling) } else { 0.0 }
    });

    RatioField {
      reduction: reduction,
      ceiling: ceiling,
      ratio: ratio,
    }
  }

  pub fn reduction(&self) -> Reduction { self.reduction }
  pub fn ceiling(&self) -> f64 { self.ceiling }
  pub fn ratio(&self) -> ArrayView<f64, Ix4> { self.ratio.view() }

  /// Writes `ratio * reduced` into the levels of `field` that the given
  /// slabs cover, flooring with [`kill_negative`]. Levels of untouched slabs
  /// keep their values. Species are processed in parallel.
  pub fn reconstruct(&self, reduced: ArrayView<f64, Ix3>,
                     mut field: ArrayViewMut<f64, Ix5>,
                     epsilon: f64, slabs: &[usize]) -> Result<()> {
    let (species, levels, nlat, nlon, ne) = field.dim();
    if self.ratio.dim() != (species, levels, nlat, nlon) {
      let r = self.ratio.dim();
      return Err(Error::schema("ratio field", &[species, levels, nlat, nlon],
                               &[r.0, r.1, r.2, r.3]));
    }
    let nslabs = self.reduction.slabs(levels);
    if reduced.dim() != (nslabs, nlat * nlon, ne) {
      let r = reduced.dim();
      return Err(Error::schema("reduced ensemble", &[nslabs, nlat * nlon, ne],
                               &[r.0, r.1, r.2]));
    }
    if let Some(&bad) = slabs.iter().find(|&&k| k >= nslabs ) {
      return Err(Error::schema("reconstructed slab", &[nslabs], &[bad]));
    }

    let reduction = self.reduction;
    Zip::from(field.axis_iter_mut(Axis(0)))
      .and(self.ratio.axis_iter(Axis(0)))
      .par_for_each(|mut out, ratio| {
        for &k in slabs.iter() {
          let slab = reduced.index_axis(Axis(0), k);
          for l in reduction.levels_of(k, levels) {
            for i in 0..nlat {
              for j in 0..nlon {
                let r = ratio[[l, i, j]];
                let cell = slab.row(i * nlon + j);
                for e in 0..ne {
                  out[[l, i, j, e]] = kill_negative(r * cell[e], epsilon);
                }
              }
            }
          }
        }
      });

    Ok(())
  }
}
