//! TOML configuration for assimilation runs.
//!
//! Every field has a default, so an empty file is a valid (small) twin
//! experiment. `validate` builds every engine object once so a bad file is
//! rejected before any cycle starts.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use na_core::{Error, Grid, ObservationKind};
use na_df::{AnalysisSettings, BoundingBox, CycleRunner, DistanceMetric, ErrorModel,
            KindSettings, LocalizationEngine, MemberGroups, Reduction,
            SequentialCompositor, StageDescriptor};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("can't read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: ::std::io::Error,
  },
  #[error("can't parse configuration: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("can't write configuration: {0}")]
  Write(#[from] toml::ser::Error),
  #[error(transparent)]
  Invalid(#[from] Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
  #[serde(default = "default_members")]
  pub members: usize,
  /// Read batches; must add up to `members`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub member_groups: Option<Vec<usize>>,
  #[serde(default = "default_epsilon")]
  pub epsilon: f64,
  #[serde(default = "default_ratio_ceiling")]
  pub ratio_ceiling: f64,
  #[serde(default = "default_workers")]
  pub workers: usize,
  #[serde(default = "default_seed")]
  pub seed: u64,
  #[serde(default)]
  pub grid: GridConfig,
  /// Overrides keyed by kind (`ground_pm10`, `modis_aod`, `viirs_aod`).
  #[serde(default)]
  pub kinds: BTreeMap<String, KindConfig>,
  #[serde(default)]
  pub localization: LocalizationConfig,
  #[serde(default = "default_stages")]
  pub stages: Vec<StageConfig>,
  #[serde(default)]
  pub twin: TwinConfig,
}

fn default_members() -> usize { 20 }
fn default_epsilon() -> f64 { na_df::compositor::DEFAULT_EPSILON }
fn default_ratio_ceiling() -> f64 { na_df::partition::DEFAULT_RATIO_CEILING }
fn default_workers() -> usize { 4 }
fn default_seed() -> u64 { 0x5eed }
fn default_true() -> bool { true }

fn default_stages() -> Vec<StageConfig> {
  vec![
    StageConfig {
      name: "satellite".into(),
      kinds: vec![ObservationKind::ModisAod.key().into(),
                  ObservationKind::ViirsAod.key().into()],
      reduction: ReductionConfig::Column,
      localize: true,
      enabled: true,
    },
    StageConfig {
      name: "ground".into(),
      kinds: vec![ObservationKind::GroundPm10.key().into()],
      reduction: ReductionConfig::Surface,
      localize: true,
      enabled: true,
    },
  ]
}

impl Default for Config {
  fn default() -> Config {
    Config {
      members: default_members(),
      member_groups: None,
      epsilon: default_epsilon(),
      ratio_ceiling: default_ratio_ceiling(),
      workers: default_workers(),
      seed: default_seed(),
      grid: Default::default(),
      kinds: BTreeMap::new(),
      localization: Default::default(),
      stages: default_stages(),
      twin: Default::default(),
    }
  }
}

/// A regular lon/lat grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
  pub lon0: f64,
  pub dlon: f64,
  pub nlon: usize,
  pub lat0: f64,
  pub dlat: f64,
  pub nlat: usize,
  pub species: usize,
  pub levels: usize,
}

impl Default for GridConfig {
  fn default() -> GridConfig {
    GridConfig {
      lon0: 70.0,
      dlon: 0.5,
      nlon: 40,
      lat0: 30.0,
      dlat: 0.5,
      nlat: 24,
      species: 3,
      levels: 4,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBoxConfig {
  pub lon_min: f64,
  pub lon_max: f64,
  pub lat_min: f64,
  pub lat_max: f64,
}

/// Unset fields keep the kind's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KindConfig {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub threshold: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub factor: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub floor: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub bbox: Option<BoundingBoxConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricConfig {
  Planar,
  GreatCircle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalizationConfig {
  pub enabled: bool,
  pub metric: MetricConfig,
  /// km; correlations vanish at twice this distance.
  pub distance_threshold: f64,
}

impl Default for LocalizationConfig {
  fn default() -> LocalizationConfig {
    LocalizationConfig {
      enabled: true,
      metric: MetricConfig::GreatCircle,
      distance_threshold: 300.0,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReductionConfig {
  Column,
  Surface,
  Layered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
  pub name: String,
  pub kinds: Vec<String>,
  pub reduction: ReductionConfig,
  #[serde(default)]
  pub localize: bool,
  #[serde(default = "default_true")]
  pub enabled: bool,
}

/// Knobs of the synthetic twin experiment run by the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwinConfig {
  pub cycles: usize,
  /// Seconds between cycles.
  pub interval: u64,
  pub stations: usize,
  pub swath_pixels: usize,
  /// Fraction of swath pixels lost to cloud.
  pub cloud_fraction: f64,
  /// Multiplicative log-normal spread of the initial ensemble.
  pub spread: f64,
  /// Truth amplitude relative to the background.
  pub truth_scale: f64,
}

impl Default for TwinConfig {
  fn default() -> TwinConfig {
    TwinConfig {
      cycles: 4,
      interval: 6 * 3600,
      stations: 30,
      swath_pixels: 150,
      cloud_fraction: 0.2,
      spread: 0.35,
      truth_scale: 1.6,
    }
  }
}

impl Config {
  pub fn from_toml_str(s: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(s)?;
    config.validate()?;
    Ok(config)
  }

  pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let content = ::std::fs::read_to_string(path)
      .map_err(|e| ConfigError::Read { path: path.to_path_buf(), source: e } )?;
    let config = Config::from_toml_str(&content)?;
    info!(path = %path.display(), members = config.members,
          stages = config.stages.len(), "configuration loaded");
    Ok(config)
  }

  pub fn to_toml_string(&self) -> Result<String, ConfigError> {
    Ok(toml::to_string(self)?)
  }

  /// Builds every engine object once and discards them.
  pub fn validate(&self) -> na_core::Result<()> {
    if self.members < 2 {
      return Err(Error::configuration(format!("an ensemble needs at least two members, got {}",
                                              self.members)));
    }
    self.runner().map(|_| ())?;
    if !(self.twin.cloud_fraction >= 0.0 && self.twin.cloud_fraction < 1.0) {
      return Err(Error::configuration("cloud fraction must be in [0, 1)"));
    }
    Ok(())
  }

  pub fn grid(&self) -> na_core::Result<Grid> {
    let g = &self.grid;
    Grid::regular(g.lon0, g.dlon, g.nlon, g.lat0, g.dlat, g.nlat, g.species, g.levels)
  }

  pub fn member_groups(&self) -> na_core::Result<MemberGroups> {
    match self.member_groups {
      Some(ref sizes) => MemberGroups::new(sizes.clone(), self.members),
      None => Ok(MemberGroups::single(self.members)),
    }
  }

  pub fn kind_settings(&self) -> na_core::Result<BTreeMap<ObservationKind, KindSettings>> {
    let mut out = BTreeMap::new();
    for (key, over) in self.kinds.iter() {
      let kind = parse_kind(key)?;
      let mut settings = KindSettings::default_for(kind);
      let threshold = over.threshold.unwrap_or(settings.error.threshold());
      let factor = over.factor.unwrap_or(settings.error.factor());
      settings.error = ErrorModel::new(threshold, factor)?;
      if let Some(floor) = over.floor {
        settings.floor = floor;
      }
      if let Some(b) = over.bbox {
        if !(b.lon_min <= b.lon_max && b.lat_min <= b.lat_max) {
          return Err(Error::configuration(format!("empty bounding box for `{}`", key)));
        }
        settings.bbox = Some(BoundingBox {
          lon_min: b.lon_min,
          lon_max: b.lon_max,
          lat_min: b.lat_min,
          lat_max: b.lat_max,
        });
      }
      out.insert(kind, settings);
    }
    Ok(out)
  }

  pub fn analysis_settings(&self) -> na_core::Result<AnalysisSettings> {
    let localization = if self.localization.enabled {
      let metric = match self.localization.metric {
        MetricConfig::Planar => DistanceMetric::Planar,
        MetricConfig::GreatCircle => DistanceMetric::GreatCircle,
      };
      Some(LocalizationEngine::new(metric, self.localization.distance_threshold)?)
    } else {
      None
    };
    Ok(AnalysisSettings {
      epsilon: self.epsilon,
      ratio_ceiling: self.ratio_ceiling,
      localization: localization,
    })
  }

  /// With localization disabled globally, stages that ask for it run
  /// unlocalized.
  pub fn stages(&self) -> na_core::Result<Vec<StageDescriptor>> {
    self.stages.iter()
      .map(|s| {
        let kinds = s.kinds.iter()
          .map(|k| parse_kind(k) )
          .collect::<na_core::Result<Vec<_>>>()?;
        let reduction = match s.reduction {
          ReductionConfig::Column => Reduction::Column,
          ReductionConfig::Surface => Reduction::Surface,
          ReductionConfig::Layered => Reduction::Layered,
        };
        Ok(StageDescriptor::new(s.name.clone(), kinds, reduction)
           .localized(s.localize && self.localization.enabled)
           .enabled(s.enabled))
      })
      .collect()
  }

  pub fn compositor(&self) -> na_core::Result<SequentialCompositor> {
    SequentialCompositor::new(self.stages()?, self.analysis_settings()?)
  }

  pub fn runner(&self) -> na_core::Result<CycleRunner> {
    CycleRunner::new(self.grid()?, self.member_groups()?, self.kind_settings()?,
                     self.compositor()?, self.workers)
  }
}

fn parse_kind(key: &str) -> na_core::Result<ObservationKind> {
  ObservationKind::from_key(key)
    .ok_or_else(|| Error::configuration(format!("unknown observation kind `{}`", key)) )
}
