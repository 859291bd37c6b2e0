//! Ensemble Kalman filter assimilation of sparse dust observations into a
//! gridded `[species, level, lat, lon]` ensemble.

extern crate ndarray as nd;
extern crate na_core;
extern crate nla_factorize;
extern crate num_traits;
extern crate rand;
extern crate rand_distr;
extern crate rayon;
extern crate tracing;

pub use compositor::{AnalysisSettings, CycleOutcome, ObservationBundle,
                     SequentialCompositor, SkipReason, StageDescriptor,
                     StageReport, StageStatus};
pub use cycle::{ingest, CycleRunner};
pub use diagnostics::{Diagnostics, FitStatistics};
pub use ensemble::{read_ensemble, write_ensemble, EnsembleField, MemberGroups};
pub use kalman::{analyze, Analysis};
pub use localization::{Coordinates, DistanceMetric, Localization,
                       LocalizationCache, LocalizationEngine};
pub use observation::{screen, BoundingBox, ErrorModel, KindSettings,
                      ObservationMapper, ObservationSet};
pub use partition::{kill_negative, RatioField, Reduction};

pub mod compositor;
pub mod cycle;
pub mod diagnostics;
pub mod ensemble;
pub mod kalman;
pub mod localization;
pub mod observation;
pub mod partition;
pub mod perturb;
pub mod utils;
