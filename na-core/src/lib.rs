extern crate ndarray as nd;
extern crate thiserror;

use nd::prelude::*;

pub use error::{Result, Error};

pub mod error;

/// Cycle timestamps are opaque to the engine; stores and sources interpret
/// them (typically seconds since some epoch).
pub type CycleTime = u64;

/// Horizontal axes plus the species/level extents of the full state.
///
/// Both axes are strictly increasing. The flattened horizontal index of
/// `(lat_idx, lon_idx)` is `lat_idx * nlon + lon_idx`.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
  lon: Array<f64, Ix1>,
  lat: Array<f64, Ix1>,
  species: usize,
  levels: usize,
}

impl Grid {
  pub fn new(lon: Array<f64, Ix1>, lat: Array<f64, Ix1>,
             species: usize, levels: usize) -> Result<Grid> {
    check_axis("longitude", lon.view())?;
    check_axis("latitude", lat.view())?;
    if species == 0 || levels == 0 {
      return Err(Error::configuration(format!("grid needs at least one species and one level, \
                                               got {} species x {} levels",
                                              species, levels)));
    }

    Ok(Grid {
      lon: lon,
      lat: lat,
      species: species,
      levels: levels,
    })
  }

  /// A regular grid whose first node sits at `(lon0, lat0)`.
  pub fn regular(lon0: f64, dlon: f64, nlon: usize,
                 lat0: f64, dlat: f64, nlat: usize,
                 species: usize, levels: usize) -> Result<Grid> {
    let lon = Array::from_shape_fn(nlon, |i| lon0 + i as f64 * dlon);
    let lat = Array::from_shape_fn(nlat, |i| lat0 + i as f64 * dlat);
    Grid::new(lon, lat, species, levels)
  }

  pub fn lon(&self) -> ArrayView<f64, Ix1> { self.lon.view() }
  pub fn lat(&self) -> ArrayView<f64, Ix1> { self.lat.view() }
  pub fn nlon(&self) -> usize { self.lon.len() }
  pub fn nlat(&self) -> usize { self.lat.len() }
  pub fn species(&self) -> usize { self.species }
  pub fn levels(&self) -> usize { self.levels }

  /// Number of horizontal cells, `nlat * nlon`.
  pub fn horizontal_len(&self) -> usize { self.nlat() * self.nlon() }

  /// `[species, level, lat, lon]`
  pub fn field_shape(&self) -> (usize, usize, usize, usize) {
    (self.species, self.levels, self.nlat(), self.nlon())
  }

  pub fn flat_index(&self, lat_idx: usize, lon_idx: usize) -> usize {
    lat_idx * self.nlon() + lon_idx
  }

  /// `(lon_min, lon_max, lat_min, lat_max)`
  pub fn extent(&self) -> (f64, f64, f64, f64) {
    (self.lon[0], self.lon[self.nlon() - 1],
     self.lat[0], self.lat[self.nlat() - 1])
  }
}

fn check_axis(name: &str, axis: ArrayView<f64, Ix1>) -> Result<()> {
  if axis.len() == 0 {
    return Err(Error::configuration(format!("{} axis is empty", name)));
  }
  if axis.iter().any(|v| !v.is_finite()) {
    return Err(Error::configuration(format!("{} axis has non-finite values", name)));
  }
  let increasing = axis.windows(2)
    .into_iter()
    .all(|w| w[0] < w[1]);
  if !increasing {
    return Err(Error::configuration(format!("{} axis must be strictly increasing", name)));
  }
  Ok(())
}

/// Whether a kind observes something at the surface or a vertical column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObservationFamily {
  Surface,
  Column,
}

/// The closed set of observation types the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObservationKind {
  /// Ground station PM10 mass concentration.
  GroundPm10,
  /// MODIS aerosol optical depth retrieval.
  ModisAod,
  /// VIIRS aerosol optical depth retrieval.
  ViirsAod,
}

impl ObservationKind {
  pub const ALL: [ObservationKind; 3] = [
    ObservationKind::GroundPm10,
    ObservationKind::ModisAod,
    ObservationKind::ViirsAod,
  ];

  /// Stable name used in configuration files and logs.
  pub fn key(&self) -> &'static str {
    match self {
      &ObservationKind::GroundPm10 => "ground_pm10",
      &ObservationKind::ModisAod => "modis_aod",
      &ObservationKind::ViirsAod => "viirs_aod",
    }
  }

  pub fn from_key(key: &str) -> Option<ObservationKind> {
    ObservationKind::ALL.iter()
      .cloned()
      .find(|k| k.key() == key)
  }

  pub fn family(&self) -> ObservationFamily {
    match self {
      &ObservationKind::GroundPm10 => ObservationFamily::Surface,
      &ObservationKind::ModisAod |
      &ObservationKind::ViirsAod => ObservationFamily::Column,
    }
  }
}

impl ::std::fmt::Display for ObservationKind {
  fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
    f.write_str(self.key())
  }
}

/// Unscreened `[lon, lat, value]` table as handed over by an observation
/// source. `layer`, when present, pins each row to one model level.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawObservations {
  pub lon: Array<f64, Ix1>,
  pub lat: Array<f64, Ix1>,
  pub value: Array<f64, Ix1>,
  pub layer: Option<Vec<usize>>,
}

impl RawObservations {
  pub fn new(lon: Array<f64, Ix1>, lat: Array<f64, Ix1>,
             value: Array<f64, Ix1>) -> Result<RawObservations> {
    let n = value.len();
    if lon.len() != n || lat.len() != n {
      return Err(Error::schema("observation table", &[n, n, n],
                               &[lon.len(), lat.len(), n]));
    }
    Ok(RawObservations {
      lon: lon,
      lat: lat,
      value: value,
      layer: None,
    })
  }

  pub fn with_layers(mut self, layer: Vec<usize>) -> Result<RawObservations> {
    if layer.len() != self.len() {
      return Err(Error::schema("observation layers", &[self.len()], &[layer.len()]));
    }
    self.layer = Some(layer);
    Ok(self)
  }

  pub fn len(&self) -> usize { self.value.len() }
  pub fn is_empty(&self) -> bool { self.value.len() == 0 }
}

/// Where member snapshots live between cycles. Implementations must be
/// callable from several reader threads at once.
pub trait EnsembleStateStore: Send + Sync {
  /// `[species, level, lat, lon]` for one member.
  fn read_member(&self, member: usize, time: CycleTime) -> Result<Array<f64, Ix4>>;
  fn write_member(&self, member: usize, time: CycleTime,
                  field: ArrayView<f64, Ix4>) -> Result<()>;
}

/// Supplies raw observations. `Ok(None)` means "nothing for this time",
/// which the engine treats as an empty set.
pub trait ObservationSource: Send + Sync {
  fn load(&self, kind: ObservationKind, time: CycleTime) -> Result<Option<RawObservations>>;
}
