//! One assimilation cycle against external collaborators: read the prior
//! ensemble, ingest observations, run the stages, write the posterior back.

use rand::{Rng, SeedableRng};
use rayon::ThreadPool;
use tracing::{debug, info, info_span, warn};

use na_core::{CycleTime, EnsembleStateStore, Grid, ObservationKind,
              ObservationSource, Result};

use crate::compositor::{CycleOutcome, ObservationBundle, SequentialCompositor};
use crate::ensemble::{read_ensemble, worker_pool, write_ensemble, MemberGroups};
use crate::localization::LocalizationCache;
use crate::observation::{screen, KindSettings, ObservationMapper, ObservationSet};

use std::collections::BTreeMap;

/// Loads, screens and maps one kind. A missing or unavailable source yields
/// an empty set so the other kinds keep flowing; fatal errors propagate.
pub fn ingest<O>(source: &O, kind: ObservationKind, time: CycleTime,
                 settings: &KindSettings,
                 mapper: &ObservationMapper) -> Result<ObservationSet>
  where O: ObservationSource + ?Sized,
{
  let loaded = source.load(kind, time)
    .and_then(|raw| {
      match raw {
        Some(raw) => {
          let screened = screen(&raw, settings.bbox.as_ref(), settings.floor);
          debug!(%kind, raw = raw.len(), screened = screened.len(), "screened");
          ObservationSet::ingest(&screened, mapper, &settings.error).map(Some)
        },
        None => Ok(None),
      }
    });

  match loaded {
    Ok(Some(set)) => {
      info!(%kind, observations = set.len(), "ingested");
      Ok(set)
    },
    Ok(None) => {
      info!(%kind, "no observations for this time");
      Ok(ObservationSet::empty())
    },
    Err(e) if !e.is_fatal() => {
      warn!(%kind, error = %e, "ingestion failed; continuing without this kind");
      Ok(ObservationSet::empty())
    },
    Err(e) => Err(e),
  }
}

/// Everything a cycle needs besides the collaborators and the clock.
#[derive(Debug)]
pub struct CycleRunner {
  grid: Grid,
  groups: MemberGroups,
  kinds: BTreeMap<ObservationKind, KindSettings>,
  compositor: SequentialCompositor,
  pool: ThreadPool,
  cache: LocalizationCache,
}

impl CycleRunner {
  /// Kinds missing from `kinds` use their defaults.
  pub fn new(grid: Grid, groups: MemberGroups,
             kinds: BTreeMap<ObservationKind, KindSettings>,
             compositor: SequentialCompositor,
             workers: usize) -> Result<CycleRunner> {
    Ok(CycleRunner {
      grid: grid,
      groups: groups,
      kinds: kinds,
      compositor: compositor,
      pool: worker_pool(workers)?,
      cache: LocalizationCache::new(),
    })
  }

  pub fn grid(&self) -> &Grid { &self.grid }
  pub fn compositor(&self) -> &SequentialCompositor { &self.compositor }
  pub fn localization_cache(&self) -> &LocalizationCache { &self.cache }

  fn kind_settings(&self, kind: ObservationKind) -> KindSettings {
    self.kinds.get(&kind)
      .cloned()
      .unwrap_or_else(|| KindSettings::default_for(kind) )
  }

  /// The posterior is written back only if every step up to and including
  /// the last stage succeeded; a fatal error leaves the store untouched.
  pub fn run<S, O, R>(&mut self, store: &S, source: &O, time: CycleTime,
                      rand: &mut R) -> Result<CycleOutcome>
    where S: EnsembleStateStore + ?Sized,
          O: ObservationSource + ?Sized,
          R: Rng + SeedableRng,
  {
    let span = info_span!("cycle", time);
    let _enter = span.enter();

    let prior = read_ensemble(store, &self.grid, &self.groups, time, &self.pool)?;
    info!(members = prior.members(), "prior ensemble read");

    let mapper = ObservationMapper::new(&self.grid);
    let mut observations = ObservationBundle::new();
    for kind in self.compositor.kinds() {
      let settings = self.kind_settings(kind);
      let set = ingest(source, kind, time, &settings, &mapper)?;
      observations.insert(kind, set);
    }

    let outcome = self.compositor.assimilate(&prior, &self.grid, &observations,
                                             &mut self.cache, rand)?;

    write_ensemble(store, &outcome.posterior, &prior, time, &self.pool)?;
    info!(failed_stages = outcome.failed_stages().count(), "posterior written");
    Ok(outcome)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use na_core::{Error, RawObservations};
  use nd::arr1;

  struct Source(fn(ObservationKind) -> Result<Option<RawObservations>>);
  impl ObservationSource for Source {
    fn load(&self, kind: ObservationKind, _: CycleTime) -> Result<Option<RawObservations>> {
      (self.0)(kind)
    }
  }

  fn grid() -> Grid {
    Grid::regular(0.0, 1.0, 4, 0.0, 1.0, 4, 1, 1).unwrap()
  }

  #[test]
  fn ingestion_recovers_from_missing_data() {
    let g = grid();
    let mapper = ObservationMapper::new(&g);
    let settings = KindSettings::default_for(ObservationKind::ModisAod);

    let missing = Source(|_| Ok(None) );
    assert!(ingest(&missing, ObservationKind::ModisAod, 0, &settings, &mapper)
            .unwrap().is_empty());

    let unavailable = Source(|_| Err(Error::unavailable("no swath")) );
    assert!(ingest(&unavailable, ObservationKind::ModisAod, 0, &settings, &mapper)
            .unwrap().is_empty());

    let broken = Source(|_| {
      Err(Error::Io(::std::io::Error::new(::std::io::ErrorKind::Other, "disk")))
    });
    assert!(ingest(&broken, ObservationKind::ModisAod, 0, &settings, &mapper).is_err());
  }

  #[test]
  fn ingestion_screens_and_maps() {
    let g = grid();
    let mapper = ObservationMapper::new(&g);
    let settings = KindSettings::default_for(ObservationKind::ModisAod);
    let source = Source(|_| {
      RawObservations::new(arr1(&[1.0, 2.0, 9.0, 3.0]),
                           arr1(&[1.0, 2.0, 1.0, 3.0]),
                           arr1(&[0.5, 0.0001, 0.5, 0.2]))
        .map(Some)
    });
    let set = ingest(&source, ObservationKind::ModisAod, 0, &settings, &mapper).unwrap();
    // below the floor, then outside the grid
    assert_eq!(set.indices(), &[5, 15]);
    assert_eq!(set.values(), arr1(&[0.5, 0.2]).view());
  }
}
