//! Distance-based covariance tapering.
//!
//! With a finite ensemble the sample covariance between a state variable and
//! a far away observation is mostly noise. The taper below multiplies both
//! ensemble covariance estimates (state x obs and obs x obs) elementwise so
//! those spurious long-range correlations vanish beyond twice the configured
//! distance.

use nd::{Array, ArrayView, Ix1, Ix2, Axis};
use nd::parallel::prelude::*;

use na_core::{Error, Result};

use std::collections::HashMap;
use std::sync::Arc;

pub const EARTH_RADIUS_KM: f64 = 6371.0;
/// Rough length of one degree in the planar approximation.
pub const KM_PER_DEGREE: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DistanceMetric {
  /// Euclidean distance in degrees, times [`KM_PER_DEGREE`].
  Planar,
  /// Haversine great-circle distance on a sphere of [`EARTH_RADIUS_KM`].
  GreatCircle,
}

impl DistanceMetric {
  /// Distance in km between two `(lon, lat)` points given in degrees.
  pub fn distance(&self, lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    match self {
      &DistanceMetric::Planar => {
        let dx = lon2 - lon1;
        let dy = lat2 - lat1;
        (dx * dx + dy * dy).sqrt() * KM_PER_DEGREE
      },
      &DistanceMetric::GreatCircle => {
        let phi1 = lat1.to_radians();
        let phi2 = lat2.to_radians();
        let dphi = phi2 - phi1;
        let dlambda = (lon2 - lon1).to_radians();

        let a = (dphi / 2.0).sin().powi(2) +
          phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
        // rounding can push `a` a hair past 1 for antipodal points
        let a = a.min(1.0).max(0.0);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
      },
    }
  }
}

/// A set of `(lon, lat)` points: either listed explicitly or implied by two
/// axes (every lat × lon pair, lat-major, matching the grid's flattened
/// index).
#[derive(Debug, Clone, Copy)]
pub enum Coordinates<'a> {
  Points {
    lon: ArrayView<'a, f64, Ix1>,
    lat: ArrayView<'a, f64, Ix1>,
  },
  Mesh {
    lon: ArrayView<'a, f64, Ix1>,
    lat: ArrayView<'a, f64, Ix1>,
  },
}

impl<'a> Coordinates<'a> {
  pub fn points(lon: ArrayView<'a, f64, Ix1>,
                lat: ArrayView<'a, f64, Ix1>) -> Coordinates<'a> {
    assert_eq!(lon.len(), lat.len(), "point lists must pair up");
    Coordinates::Points { lon: lon, lat: lat }
  }
  pub fn mesh(lon: ArrayView<'a, f64, Ix1>,
              lat: ArrayView<'a, f64, Ix1>) -> Coordinates<'a> {
    Coordinates::Mesh { lon: lon, lat: lat }
  }

  pub fn len(&self) -> usize {
    match self {
      &Coordinates::Points { ref lon, .. } => lon.len(),
      &Coordinates::Mesh { ref lon, ref lat } => lon.len() * lat.len(),
    }
  }
  pub fn is_empty(&self) -> bool { self.len() == 0 }

  /// `(lon, lat)` of point `i`.
  pub fn point(&self, i: usize) -> (f64, f64) {
    match self {
      &Coordinates::Points { ref lon, ref lat } => (lon[i], lat[i]),
      &Coordinates::Mesh { ref lon, ref lat } => {
        let nlon = lon.len();
        (lon[i % nlon], lat[i / nlon])
      },
    }
  }

  /// Kind tag, lon count, then the bits of every lon and lat.
  fn key_bits(&self) -> Vec<u64> {
    let (tag, lon, lat) = match self {
      &Coordinates::Points { ref lon, ref lat } => (0, lon, lat),
      &Coordinates::Mesh { ref lon, ref lat } => (1, lon, lat),
    };
    let mut bits = Vec::with_capacity(2 + lon.len() + lat.len());
    bits.push(tag);
    bits.push(lon.len() as u64);
    bits.extend(lon.iter().chain(lat.iter()).map(|v| v.to_bits() ));
    bits
  }
}

/// Pairwise distances, `from.len() x to.len()`, rows filled in parallel.
pub fn distance_matrix(metric: DistanceMetric,
                       from: &Coordinates,
                       to: &Coordinates) -> Array<f64, Ix2> {
  pairwise(from, to, |a, b| metric.distance(a.0, a.1, b.0, b.1) )
}

fn pairwise<F>(from: &Coordinates, to: &Coordinates, f: F) -> Array<f64, Ix2>
  where F: Fn((f64, f64), (f64, f64)) -> f64 + Sync,
{
  let mut out = Array::zeros((from.len(), to.len()));
  out.axis_iter_mut(Axis(0))
    .into_par_iter()
    .enumerate()
    .for_each(|(i, mut row)| {
      let a = from.point(i);
      for (j, dest) in row.iter_mut().enumerate() {
        *dest = f(a, to.point(j));
      }
    });
  out
}

/// Gaspari-Cohn fifth order piecewise rational function of the normalized
/// distance `s = d / threshold`. Compactly supported on `[0, 2)`; 1 at the
/// origin and continuous at `s = 1` and `s = 2`.
pub fn gaspari_cohn(s: f64) -> f64 {
  let s = s.abs();
  let v = if s < 1.0 {
    1.0
      - 5.0 / 3.0 * s.powi(2)
      + 5.0 / 8.0 * s.powi(3)
      + 1.0 / 2.0 * s.powi(4)
      - 1.0 / 4.0 * s.powi(5)
  } else if s < 2.0 {
    // s >= 1 here, so the reciprocal is finite
    -2.0 / 3.0 / s
      + 4.0
      - 5.0 * s
      + 5.0 / 3.0 * s.powi(2)
      + 5.0 / 8.0 * s.powi(3)
      - 1.0 / 2.0 * s.powi(4)
      + 1.0 / 12.0 * s.powi(5)
  } else {
    0.0
  };
  v.max(0.0).min(1.0)
}

/// The two taper matrices of one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Localization {
  /// `Ns x m`
  pub state_obs: Array<f64, Ix2>,
  /// `m x m`, symmetric
  pub obs_obs: Array<f64, Ix2>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalizationEngine {
  metric: DistanceMetric,
  distance_threshold: f64,
}

impl LocalizationEngine {
  /// `distance_threshold` in km; correlations vanish at twice this.
  pub fn new(metric: DistanceMetric, distance_threshold: f64) -> Result<LocalizationEngine> {
    if !(distance_threshold > 0.0) || !distance_threshold.is_finite() {
      return Err(Error::configuration(format!("localization distance must be positive, got {}",
                                              distance_threshold)));
    }
    Ok(LocalizationEngine {
      metric: metric,
      distance_threshold: distance_threshold,
    })
  }

  pub fn metric(&self) -> DistanceMetric { self.metric }
  pub fn distance_threshold(&self) -> f64 { self.distance_threshold }

  pub fn taper(&self, d: f64) -> f64 {
    gaspari_cohn(d / self.distance_threshold)
  }

  pub fn taper_matrix(&self, from: &Coordinates, to: &Coordinates) -> Array<f64, Ix2> {
    let metric = self.metric;
    pairwise(from, to, |a, b| {
      self.taper(metric.distance(a.0, a.1, b.0, b.1))
    })
  }

  pub fn build(&self, state: &Coordinates, obs: &Coordinates) -> Localization {
    let state_obs = self.taper_matrix(state, obs);
    let mut obs_obs = self.taper_matrix(obs, obs);
    // haversine isn't bit-symmetric in its arguments
    let m = obs_obs.dim().0;
    for i in 0..m {
      for j in i + 1..m {
        obs_obs[[j, i]] = obs_obs[[i, j]];
      }
    }
    Localization {
      state_obs: state_obs,
      obs_obs: obs_obs,
    }
  }

  fn key(&self, state: &Coordinates, obs: &Coordinates) -> CacheKey {
    CacheKey {
      metric: self.metric,
      threshold: self.distance_threshold.to_bits(),
      state: state.key_bits(),
      obs: obs.key_bits(),
    }
  }
}

/// The full geometry a build depends on; compared exactly on lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
  metric: DistanceMetric,
  threshold: u64,
  state: Vec<u64>,
  obs: Vec<u64>,
}

#[derive(Debug)]
struct CacheEntry {
  localization: Arc<Localization>,
  last_used: u64,
}

pub const DEFAULT_CACHE_CAPACITY: usize = 16;

/// Memo of taper matrices keyed by metric, threshold and the exact bits of
/// both coordinate sets. Localization is pure geometry, so repeated stages
/// (or levels) that share observation locations reuse one build.
///
/// Holds at most `capacity` builds; the least recently used one is evicted
/// to make room.
#[derive(Debug)]
pub struct LocalizationCache {
  entries: HashMap<CacheKey, CacheEntry>,
  capacity: usize,
  clock: u64,
  hits: usize,
}

impl Default for LocalizationCache {
  fn default() -> LocalizationCache {
    LocalizationCache::with_capacity(DEFAULT_CACHE_CAPACITY)
  }
}

impl LocalizationCache {
  pub fn new() -> LocalizationCache { Default::default() }

  /// A capacity of zero disables memoization.
  pub fn with_capacity(capacity: usize) -> LocalizationCache {
    LocalizationCache {
      entries: HashMap::new(),
      capacity: capacity,
      clock: 0,
      hits: 0,
    }
  }

  pub fn get_or_build(&mut self, engine: &LocalizationEngine,
                      state: &Coordinates,
                      obs: &Coordinates) -> Arc<Localization> {
    self.clock += 1;
    let key = engine.key(state, obs);
    if let Some(hit) = self.entries.get_mut(&key) {
      hit.last_used = self.clock;
      self.hits += 1;
      return hit.localization.clone();
    }

    let built = Arc::new(engine.build(state, obs));
    if self.capacity == 0 {
      return built;
    }
    while self.entries.len() >= self.capacity {
      let oldest = self.entries.iter()
        .min_by_key(|&(_, e)| e.last_used )
        .map(|(k, _)| k.clone() );
      match oldest {
        Some(k) => { self.entries.remove(&k); },
        None => break,
      }
    }
    self.entries.insert(key, CacheEntry {
      localization: built.clone(),
      last_used: self.clock,
    });
    built
  }

  pub fn len(&self) -> usize { self.entries.len() }
  pub fn is_empty(&self) -> bool { self.entries.is_empty() }
  pub fn capacity(&self) -> usize { self.capacity }
  pub fn hits(&self) -> usize { self.hits }
  pub fn clear(&mut self) {
    self.entries.clear();
    self.hits = 0;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use nd::arr1;
  use nla_factorize::is_symmetric;
  use proptest::prelude::*;

  #[test]
  fn taper_closed_form() {
    assert_eq!(gaspari_cohn(0.0), 1.0);
    assert!((gaspari_cohn(1.0) - 5.0 / 24.0).abs() < 1e-12);
    assert_eq!(gaspari_cohn(2.0), 0.0);
    assert_eq!(gaspari_cohn(7.5), 0.0);
  }

  #[test]
  fn taper_continuous_at_breaks() {
    let h = 1e-9;
    assert!((gaspari_cohn(1.0 - h) - gaspari_cohn(1.0 + h)).abs() < 1e-6);
    assert!(gaspari_cohn(2.0 - h).abs() < 1e-6);
  }

  #[test]
  fn engine_scales_by_threshold() {
    let e = LocalizationEngine::new(DistanceMetric::Planar, 300.0).unwrap();
    assert_eq!(e.taper(0.0), 1.0);
    assert_eq!(e.taper(600.0), 0.0);
    assert!((e.taper(300.0) - 5.0 / 24.0).abs() < 1e-12);
    assert!(LocalizationEngine::new(DistanceMetric::Planar, 0.0).is_err());
  }

  #[test]
  fn metrics() {
    let planar = DistanceMetric::Planar.distance(0.0, 0.0, 3.0, 4.0);
    assert!((planar - 500.0).abs() < 1e-9);

    // a quarter of the equator
    let gc = DistanceMetric::GreatCircle.distance(0.0, 0.0, 90.0, 0.0);
    let expected = EARTH_RADIUS_KM * ::std::f64::consts::PI / 2.0;
    assert!((gc - expected).abs() < 1e-6);
    // pole to pole
    let gc = DistanceMetric::GreatCircle.distance(10.0, -90.0, 10.0, 90.0);
    assert!((gc - EARTH_RADIUS_KM * ::std::f64::consts::PI).abs() < 1e-6);
  }

  #[test]
  fn mesh_matches_points() {
    let lon = arr1(&[0.0, 1.0, 2.0]);
    let lat = arr1(&[10.0, 11.0]);
    let mesh = Coordinates::mesh(lon.view(), lat.view());
    assert_eq!(mesh.len(), 6);
    assert_eq!(mesh.point(4), (1.0, 11.0));

    let plon = arr1(&[0.0, 1.0, 2.0, 0.0, 1.0, 2.0]);
    let plat = arr1(&[10.0, 10.0, 10.0, 11.0, 11.0, 11.0]);
    let pts = Coordinates::points(plon.view(), plat.view());

    let one = arr1(&[0.5]);
    let one_lat = arr1(&[10.5]);
    let single = Coordinates::points(one.view(), one_lat.view());

    let a = distance_matrix(DistanceMetric::GreatCircle, &mesh, &single);
    let b = distance_matrix(DistanceMetric::GreatCircle, &pts, &single);
    assert_eq!(a, b);
    assert_eq!(a.dim(), (6, 1));

    let many = distance_matrix(DistanceMetric::Planar, &mesh, &mesh);
    assert_eq!(many.dim(), (6, 6));
    assert!(many.diag().iter().all(|&d| d == 0.0 ));
  }

  #[test]
  fn build_shapes_and_symmetry() {
    let e = LocalizationEngine::new(DistanceMetric::GreatCircle, 150.0).unwrap();
    let glon = arr1(&[0.0, 1.0, 2.0, 3.0]);
    let glat = arr1(&[40.0, 41.0, 42.0]);
    let olon = arr1(&[0.3, 2.9, 1.7]);
    let olat = arr1(&[40.2, 41.9, 40.0]);
    let loc = e.build(&Coordinates::mesh(glon.view(), glat.view()),
                      &Coordinates::points(olon.view(), olat.view()));
    assert_eq!(loc.state_obs.dim(), (12, 3));
    assert_eq!(loc.obs_obs.dim(), (3, 3));
    assert!(is_symmetric(loc.obs_obs.view(), 0.0));
    assert!(loc.obs_obs.diag().iter().all(|&v| v == 1.0 ));
    assert!(loc.state_obs.iter().all(|&v| v >= 0.0 && v <= 1.0 ));
  }

  #[test]
  fn cache_reuses_identical_geometry() {
    let e = LocalizationEngine::new(DistanceMetric::Planar, 100.0).unwrap();
    let glon = arr1(&[0.0, 1.0]);
    let glat = arr1(&[0.0, 1.0]);
    let olon = arr1(&[0.5]);
    let olat = arr1(&[0.5]);
    let other_lat = arr1(&[0.25]);
    let state = Coordinates::mesh(glon.view(), glat.view());

    let mut cache = LocalizationCache::new();
    let a = cache.get_or_build(&e, &state, &Coordinates::points(olon.view(), olat.view()));
    let b = cache.get_or_build(&e, &state, &Coordinates::points(olon.view(), olat.view()));
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(cache.hits(), 1);

    cache.get_or_build(&e, &state, &Coordinates::points(olon.view(), other_lat.view()));
    let wider = LocalizationEngine::new(DistanceMetric::Planar, 200.0).unwrap();
    cache.get_or_build(&wider, &state, &Coordinates::points(olon.view(), olat.view()));
    assert_eq!(cache.len(), 3);

    cache.clear();
    assert!(cache.is_empty());
  }

  #[test]
  fn cache_evicts_least_recently_used() {
    let e = LocalizationEngine::new(DistanceMetric::Planar, 100.0).unwrap();
    let glon = arr1(&[0.0, 1.0]);
    let glat = arr1(&[0.0, 1.0]);
    let state = Coordinates::mesh(glon.view(), glat.view());
    let olat = arr1(&[0.5]);
    let lons: Vec<_> = (0..7).map(|c| arr1(&[0.1 * c as f64]) ).collect();

    let mut cache = LocalizationCache::with_capacity(3);
    let first = cache.get_or_build(&e, &state, &Coordinates::points(lons[0].view(), olat.view()));
    for c in 1..7 {
      // keep the first geometry warm
      cache.get_or_build(&e, &state, &Coordinates::points(lons[0].view(), olat.view()));
      cache.get_or_build(&e, &state, &Coordinates::points(lons[c].view(), olat.view()));
      assert!(cache.len() <= 3);
    }
    assert_eq!(cache.len(), 3);
    let again = cache.get_or_build(&e, &state, &Coordinates::points(lons[0].view(), olat.view()));
    assert!(Arc::ptr_eq(&first, &again));

    // evicted, so this is a fresh build
    let hits = cache.hits();
    cache.get_or_build(&e, &state, &Coordinates::points(lons[1].view(), olat.view()));
    assert_eq!(cache.hits(), hits);

    let mut off = LocalizationCache::with_capacity(0);
    off.get_or_build(&e, &state, &Coordinates::points(lons[0].view(), olat.view()));
    assert!(off.is_empty());
  }

  #[test]
  fn cache_key_keeps_full_geometry() {
    let e = LocalizationEngine::new(DistanceMetric::Planar, 100.0).unwrap();
    let glon = arr1(&[0.0, 1.0, 2.0]);
    let glat = arr1(&[0.0, 1.0]);
    let flat = arr1(&[0.0, 1.0, 2.0, 0.0, 1.0, 2.0]);
    let flat_lat = arr1(&[0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
    let olon = arr1(&[0.5]);
    let olat = arr1(&[0.5]);
    let obs = Coordinates::points(olon.view(), olat.view());

    let mesh = e.key(&Coordinates::mesh(glon.view(), glat.view()), &obs);
    let points = e.key(&Coordinates::points(flat.view(), flat_lat.view()), &obs);
    assert!(mesh != points);
    assert_eq!(mesh, e.key(&Coordinates::mesh(glon.view(), glat.view()), &obs));
  }

  proptest! {
    #[test]
    fn taper_bounded_and_non_increasing(a in 0.0f64..3.0, b in 0.0f64..3.0) {
      let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
      let (t_lo, t_hi) = (gaspari_cohn(lo), gaspari_cohn(hi));
      prop_assert!(t_lo >= 0.0 && t_lo <= 1.0);
      prop_assert!(t_hi >= 0.0 && t_hi <= 1.0);
      prop_assert!(t_hi <= t_lo + 1e-12);
      if hi >= 2.0 {
        prop_assert_eq!(t_hi, 0.0);
      }
    }
  }
}
