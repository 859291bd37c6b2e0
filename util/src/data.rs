//! Synthetic truth, ensemble and observations for twin experiments.

use nd::{Array, ArrayView, ArrayViewMut, Axis, Ix1, Ix4, Zip};
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rand_isaac::Isaac64Rng;
use rayon::prelude::*;

use na_core::{Grid, RawObservations, Result};
use na_df::{ErrorModel, ObservationMapper};

/// Dust-free air still carries this much mass per cell.
pub const BACKGROUND: f64 = 20.0;

/// A Gaussian dust plume; `radius` is the e-folding distance in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plume {
  pub lon: f64,
  pub lat: f64,
  pub radius: f64,
  pub amplitude: f64,
}

impl Plume {
  fn at(&self, lon: f64, lat: f64) -> f64 {
    let d2 = (lon - self.lon).powi(2) + (lat - self.lat).powi(2);
    self.amplitude * (-d2 / (self.radius * self.radius)).exp()
  }
}

/// Plumes with centres drawn uniformly over the grid's extent.
pub fn random_plumes<R>(grid: &Grid, count: usize, amplitude: f64,
                        rand: &mut R) -> Vec<Plume>
  where R: Rng + ?Sized,
{
  let (lon0, lon1, lat0, lat1) = grid.extent();
  let span = (lon1 - lon0).max(lat1 - lat0).max(1.0);
  (0..count)
    .map(|_| {
      Plume {
        lon: lon0 + (lon1 - lon0) * rand.gen::<f64>(),
        lat: lat0 + (lat1 - lat0) * rand.gen::<f64>(),
        radius: span * (0.08 + 0.12 * rand.gen::<f64>()),
        amplitude: amplitude * (0.5 + rand.gen::<f64>()),
      }
    })
    .collect()
}

/// Share of species `s` among `n`; coarser bins carry more mass.
fn species_share(s: usize, n: usize) -> f64 {
  let total = (n * (n + 1) / 2) as f64;
  (s + 1) as f64 / total
}

fn level_weight(l: usize) -> f64 { (-(l as f64) / 2.0).exp() }

/// `[species, level, lat, lon]` dust field: background plus plumes, split
/// over species and decaying with height.
pub fn dust_field(grid: &Grid, plumes: &[Plume]) -> Array<f64, Ix4> {
  let lon = grid.lon();
  let lat = grid.lat();
  let species = grid.species();
  Array::from_shape_fn(grid.field_shape(), |(s, l, i, j)| {
    let column: f64 = plumes.iter()
      .map(|p| p.at(lon[j], lat[i]) )
      .sum();
    species_share(s, species) * level_weight(l) * (BACKGROUND + column)
  })
}

/// Perturbed copies of `base`: one log-normal factor per `(species, level)`
/// and a weaker one per cell, so members stay positive. Member `m` uses its
/// own generator seeded from `seed + m`, so the result does not depend on
/// scheduling.
pub fn perturbed_members(base: ArrayView<f64, Ix4>, members: usize,
                         spread: f64, seed: u64) -> Vec<Array<f64, Ix4>> {
  (0..members)
    .into_par_iter()
    .map(|m| {
      let mut rand = Isaac64Rng::seed_from_u64(seed.wrapping_add(m as u64));
      let mut member = base.to_owned();
      for mut species in member.axis_iter_mut(Axis(0)) {
        for mut level in species.axis_iter_mut(Axis(0)) {
          let z: f64 = rand.sample(StandardNormal);
          level *= log_normal(z, spread);
          level.mapv_inplace(|v| {
            let z: f64 = rand.sample(StandardNormal);
            v * log_normal(z, spread / 3.0)
          });
        }
      }
      member
    })
    .collect()
}

/// Median-preserving log-normal factor.
fn log_normal(z: f64, sigma: f64) -> f64 {
  (sigma * z - sigma * sigma / 2.0).exp()
}

/// Moves everything `shift` cells east, feeding the western edge with its
/// own current values, then scales by `decay`. A crude stand-in for the
/// transport model between cycles.
pub fn transport(mut field: ArrayViewMut<f64, Ix4>, shift: usize, decay: f64) {
  let nlon = field.len_of(Axis(3));
  if shift > 0 && nlon > 1 {
    let shift = shift.min(nlon - 1);
    let src = field.to_owned();
    Zip::indexed(&mut field)
      .for_each(|(s, l, i, j), v| {
        let from = if j >= shift { j - shift } else { 0 };
        *v = src[[s, l, i, from]];
      });
  }
  field *= decay;
}

/// Surface total over species at level 0, `[lat, lon]`.
fn surface_total(field: ArrayView<f64, Ix4>) -> Array<f64, nd::Ix2> {
  field.index_axis(Axis(1), 0).sum_axis(Axis(0))
}

/// Column total over species and levels, `[lat, lon]`.
fn column_total(field: ArrayView<f64, Ix4>) -> Array<f64, nd::Ix2> {
  field.sum_axis(Axis(0)).sum_axis(Axis(0))
}

fn noisy<R: Rng + ?Sized>(v: f64, error: &ErrorModel, rand: &mut R) -> f64 {
  let z: f64 = rand.sample(StandardNormal);
  (v + error.error(v) * z).max(0.0)
}

/// Ground stations at `count` random grid nodes measuring the surface total
/// of `truth`.
pub fn station_observations<R>(grid: &Grid, truth: ArrayView<f64, Ix4>, count: usize,
                               error: &ErrorModel, rand: &mut R) -> Result<RawObservations>
  where R: Rng + ?Sized,
{
  let surface = surface_total(truth);
  let mut lon = Vec::with_capacity(count);
  let mut lat = Vec::with_capacity(count);
  let mut value = Vec::with_capacity(count);
  for _ in 0..count {
    let i = rand.gen_range(0..grid.nlat());
    let j = rand.gen_range(0..grid.nlon());
    lon.push(grid.lon()[j]);
    lat.push(grid.lat()[i]);
    value.push(noisy(surface[[i, j]], error, rand));
  }
  RawObservations::new(Array::from(lon), Array::from(lat), Array::from(value))
}

/// A satellite swath of `pixels` scattered retrievals of the column total.
/// Cloudy pixels come back as NaN and are left for screening to drop.
pub fn swath_observations<R>(grid: &Grid, truth: ArrayView<f64, Ix4>, pixels: usize,
                             cloud_fraction: f64, error: &ErrorModel,
                             rand: &mut R) -> Result<RawObservations>
  where R: Rng + ?Sized,
{
  let column = column_total(truth);
  let mapper = ObservationMapper::new(grid);
  let nlon = grid.nlon() as isize;
  let (lon0, lon1, lat0, lat1) = grid.extent();

  let mut lon: Array<f64, Ix1> = Array::zeros(pixels);
  let mut lat: Array<f64, Ix1> = Array::zeros(pixels);
  let mut value: Array<f64, Ix1> = Array::zeros(pixels);
  for p in 0..pixels {
    let x = lon0 + (lon1 - lon0) * rand.gen::<f64>();
    let y = lat0 + (lat1 - lat0) * rand.gen::<f64>();
    lon[p] = x;
    lat[p] = y;
    let idx = mapper.index_of(x, y);
    value[p] = if idx < 0 || rand.gen::<f64>() < cloud_fraction {
      ::std::f64::NAN
    } else {
      let (i, j) = ((idx / nlon) as usize, (idx % nlon) as usize);
      noisy(column[[i, j]], error, rand)
    };
  }
  RawObservations::new(lon, lat, value)
}
