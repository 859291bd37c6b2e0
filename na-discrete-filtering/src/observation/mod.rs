//! Observation screening, mapping and the per-stage observation vector.

use nd::{Array, ArrayView, Ix1};

use na_core::{Error, ObservationKind, RawObservations, Result};

pub use self::error_model::ErrorModel;
pub use self::mapper::{nearest_node, ObservationMapper, OUTSIDE};

pub mod error_model;
pub mod mapper;

/// Inclusive lon/lat box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  pub lon_min: f64,
  pub lon_max: f64,
  pub lat_min: f64,
  pub lat_max: f64,
}

impl BoundingBox {
  pub fn contains(&self, lon: f64, lat: f64) -> bool {
    lon >= self.lon_min && lon <= self.lon_max &&
      lat >= self.lat_min && lat <= self.lat_max
  }
}

/// How one observation kind is screened and weighted.
#[derive(Debug, Clone, PartialEq)]
pub struct KindSettings {
  pub error: ErrorModel,
  /// Values below this are dropped during screening.
  pub floor: f64,
  pub bbox: Option<BoundingBox>,
}

impl KindSettings {
  pub fn default_for(kind: ObservationKind) -> KindSettings {
    let floor = match kind {
      ObservationKind::GroundPm10 => 0.0,
      ObservationKind::ModisAod |
      ObservationKind::ViirsAod => 1e-3,
    };
    KindSettings {
      error: ErrorModel::for_kind(kind),
      floor: floor,
      bbox: None,
    }
  }
}

/// Drops rows with a NaN in any column, rows outside `bbox`, and rows whose
/// value is below `floor`.
pub fn screen(raw: &RawObservations, bbox: Option<&BoundingBox>,
              floor: f64) -> RawObservations {
  let keep: Vec<usize> = (0..raw.len())
    .filter(|&i| {
      let (lon, lat, v) = (raw.lon[i], raw.lat[i], raw.value[i]);
      if lon.is_nan() || lat.is_nan() || v.is_nan() {
        return false;
      }
      if let Some(bbox) = bbox {
        if !bbox.contains(lon, lat) {
          return false;
        }
      }
      v >= floor
    })
    .collect();

  RawObservations {
    lon: keep.iter().map(|&i| raw.lon[i] ).collect(),
    lat: keep.iter().map(|&i| raw.lat[i] ).collect(),
    value: keep.iter().map(|&i| raw.value[i] ).collect(),
    layer: raw.layer.as_ref()
      .map(|l| keep.iter().map(|&i| l[i] ).collect() ),
  }
}

/// The observation vector of one stage: values, error variances (the
/// diagonal of `R`), flattened grid indices (the gather that realizes `H`)
/// and the coordinates used for localization.
///
/// `layer[i] == None` means observation `i` applies to every level of a
/// layered stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationSet {
  values: Array<f64, Ix1>,
  variances: Array<f64, Ix1>,
  indices: Vec<usize>,
  lon: Array<f64, Ix1>,
  lat: Array<f64, Ix1>,
  layer: Vec<Option<usize>>,
}

impl ObservationSet {
  pub fn empty() -> ObservationSet {
    ObservationSet {
      values: Array::zeros(0),
      variances: Array::zeros(0),
      indices: Vec::new(),
      lon: Array::zeros(0),
      lat: Array::zeros(0),
      layer: Vec::new(),
    }
  }

  pub fn new(values: Array<f64, Ix1>, variances: Array<f64, Ix1>,
             indices: Vec<usize>,
             lon: Array<f64, Ix1>, lat: Array<f64, Ix1>) -> Result<ObservationSet> {
    let m = values.len();
    let found = [variances.len(), indices.len(), lon.len(), lat.len()];
    if found.iter().any(|&n| n != m ) {
      return Err(Error::schema("observation set", &[m; 4], &found));
    }
    if let Some(bad) = variances.iter().position(|&r| !(r > 0.0) || !r.is_finite() ) {
      return Err(Error::numerical(format!("observation {} has error variance {}; R must be \
                                           diagonal positive",
                                          bad, variances[bad])));
    }
    if let Some(bad) = values.iter().position(|v| !v.is_finite() ) {
      return Err(Error::numerical(format!("observation {} is not finite", bad)));
    }

    Ok(ObservationSet {
      values: values,
      variances: variances,
      indices: indices,
      lon: lon,
      lat: lat,
      layer: vec![None; m],
    })
  }

  /// Pins each observation to one level.
  pub fn with_layers(mut self, layer: Vec<Option<usize>>) -> Result<ObservationSet> {
    if layer.len() != self.len() {
      return Err(Error::schema("observation layers", &[self.len()], &[layer.len()]));
    }
    self.layer = layer;
    Ok(self)
  }

  /// Maps screened observations onto the grid, drops the ones that fall
  /// outside it (or name a level the grid doesn't have) and attaches error
  /// variances.
  pub fn ingest(raw: &RawObservations, mapper: &ObservationMapper,
                error: &ErrorModel) -> Result<ObservationSet> {
    let mapped = mapper.map(raw.lon.view(), raw.lat.view());
    let levels = mapper.grid().levels();

    let keep: Vec<usize> = (0..raw.len())
      .filter(|&i| mapped[i] != OUTSIDE )
      .filter(|&i| {
        raw.layer.as_ref()
          .map(|l| l[i] < levels )
          .unwrap_or(true)
      })
      .collect();

    let values: Array<f64, Ix1> = keep.iter().map(|&i| raw.value[i] ).collect();
    let variances = error.variances(values.view());
    let set = ObservationSet::new(values, variances,
                                  keep.iter().map(|&i| mapped[i] as usize ).collect(),
                                  keep.iter().map(|&i| raw.lon[i] ).collect(),
                                  keep.iter().map(|&i| raw.lat[i] ).collect())?;
    match raw.layer {
      Some(ref l) => set.with_layers(keep.iter().map(|&i| Some(l[i]) ).collect()),
      None => Ok(set),
    }
  }

  /// Simultaneous fusion: stacks several sets into one vector so they enter
  /// a single solve.
  pub fn concat<'a, I>(sets: I) -> ObservationSet
    where I: IntoIterator<Item = &'a ObservationSet>,
  {
    let mut out = ObservationSet::empty();
    let mut values = Vec::new();
    let mut variances = Vec::new();
    let mut lon = Vec::new();
    let mut lat = Vec::new();
    for set in sets {
      values.extend(set.values.iter().cloned());
      variances.extend(set.variances.iter().cloned());
      lon.extend(set.lon.iter().cloned());
      lat.extend(set.lat.iter().cloned());
      out.indices.extend(set.indices.iter().cloned());
      out.layer.extend(set.layer.iter().cloned());
    }
    out.values = Array::from(values);
    out.variances = Array::from(variances);
    out.lon = Array::from(lon);
    out.lat = Array::from(lat);
    out
  }

  /// The rows with the given positions, in order.
  pub fn select(&self, rows: &[usize]) -> ObservationSet {
    ObservationSet {
      values: rows.iter().map(|&i| self.values[i] ).collect(),
      variances: rows.iter().map(|&i| self.variances[i] ).collect(),
      indices: rows.iter().map(|&i| self.indices[i] ).collect(),
      lon: rows.iter().map(|&i| self.lon[i] ).collect(),
      lat: rows.iter().map(|&i| self.lat[i] ).collect(),
      layer: rows.iter().map(|&i| self.layer[i] ).collect(),
    }
  }

  /// Observations that update `level`: those pinned to it and those not
  /// pinned at all.
  pub fn for_layer(&self, level: usize) -> ObservationSet {
    let rows: Vec<usize> = self.layer.iter()
      .enumerate()
      .filter(|&(_, l)| l.map(|l| l == level ).unwrap_or(true) )
      .map(|(i, _)| i )
      .collect();
    self.select(&rows)
  }

  pub fn len(&self) -> usize { self.values.len() }
  pub fn is_empty(&self) -> bool { self.values.len() == 0 }

  pub fn values(&self) -> ArrayView<f64, Ix1> { self.values.view() }
  pub fn variances(&self) -> ArrayView<f64, Ix1> { self.variances.view() }
  pub fn indices(&self) -> &[usize] { &self.indices[..] }
  pub fn lon(&self) -> ArrayView<f64, Ix1> { self.lon.view() }
  pub fn lat(&self) -> ArrayView<f64, Ix1> { self.lat.view() }
  pub fn layers(&self) -> &[Option<usize>] { &self.layer[..] }
}
