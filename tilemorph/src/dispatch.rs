//! Parallel per-source processing of one tile.
//!
//! Every candidate becomes an independent task on a fixed-size rayon pool:
//! cutout extraction followed by morphology measurement. Tasks share the
//! tile's rasters read-only. Successful records go through a bounded channel
//! to a single writer thread, which owns the results file for the duration of
//! the tile. A failing or panicking task only loses its own row.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crossbeam_channel::{bounded, Sender};
use log::{debug, error, info};
use rayon::prelude::*;
use shared::image_proc::{extract_cutout, CutoutConfig, CutoutError, RasterSet, ReferencePsf};
use thiserror::Error;

use crate::catalog::Candidate;
use crate::morphology::{MorphologyAdapter, MorphologyError, MorphologyRecord, SourceIdentity};
use crate::results::ResultsWriter;
use crate::tile::TileId;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Error, Debug)]
enum SourceError {
    #[error(transparent)]
    Cutout(#[from] CutoutError),
    #[error(transparent)]
    Measurement(#[from] MorphologyError),
}

/// Step at which a source failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Cutout,
    Measurement,
    Panic,
    /// The results writer was no longer accepting records
    Queue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome {
    Measured {
        idx: usize,
    },
    Failed {
        idx: usize,
        stage: FailureStage,
        reason: String,
    },
}

impl SourceOutcome {
    pub fn idx(&self) -> usize {
        match self {
            SourceOutcome::Measured { idx } | SourceOutcome::Failed { idx, .. } => *idx,
        }
    }

    pub fn is_measured(&self) -> bool {
        matches!(self, SourceOutcome::Measured { .. })
    }
}

/// What happened to every candidate of a tile.
#[derive(Debug, Clone, Default)]
pub struct DispatchSummary {
    /// One entry per candidate, in candidate order
    pub outcomes: Vec<SourceOutcome>,
    /// Rows appended to the results file
    pub written: usize,
    /// Records measured but lost to results file errors
    pub write_failures: usize,
}

impl DispatchSummary {
    pub fn measured(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_measured()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &SourceOutcome> {
        self.outcomes.iter().filter(|o| !o.is_measured())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct Dispatcher {
    pool: rayon::ThreadPool,
    workers: usize,
    queue_depth: usize,
    cutout: CutoutConfig,
}

impl Dispatcher {
    /// One worker per CPU, leaving one for the writer and the driver, and at least one.
    pub fn default_workers() -> usize {
        num_cpus::get().saturating_sub(1).max(1)
    }

    pub fn new(workers: Option<usize>, cutout: CutoutConfig) -> Result<Self, DispatchError> {
        let workers = workers.unwrap_or_else(Self::default_workers).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("morph-worker-{i}"))
            .build()?;
        Ok(Self {
            pool,
            workers,
            queue_depth: workers * 4,
            cutout,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Measure every candidate and append the successes to `results`.
    ///
    /// Returns once every task has resolved. Row order in the file follows
    /// completion order.
    pub fn run(
        &self,
        tile: &TileId,
        candidates: &[Candidate],
        rasters: &RasterSet<'_>,
        psf: &ReferencePsf,
        adapter: &MorphologyAdapter,
        results: &mut ResultsWriter,
    ) -> DispatchSummary {
        info!(
            "Dispatching {} galaxies of tile {tile} to {} workers",
            candidates.len(),
            self.workers
        );
        let (sender, receiver) = bounded::<MorphologyRecord>(self.queue_depth);

        std::thread::scope(|scope| {
            let writer = scope.spawn(move || {
                let (mut written, mut failures) = (0, 0);
                for record in receiver {
                    match results.append(&record) {
                        Ok(()) => written += 1,
                        Err(e) => {
                            error!("Failed to write result for tile {tile}: {e}");
                            failures += 1;
                        }
                    }
                }
                (written, failures)
            });

            let outcomes: Vec<SourceOutcome> = self.pool.install(|| {
                candidates
                    .par_iter()
                    .map_with(sender, |sender, candidate| {
                        self.process_source(tile, candidate, rasters, psf, adapter, sender)
                    })
                    .collect()
            });

            let (written, write_failures) = writer.join().unwrap_or_else(|payload| {
                error!(
                    "Results writer for tile {tile} panicked: {}",
                    panic_message(payload.as_ref())
                );
                (0, 0)
            });

            DispatchSummary {
                outcomes,
                written,
                write_failures,
            }
        })
    }

    fn process_source(
        &self,
        tile: &TileId,
        candidate: &Candidate,
        rasters: &RasterSet<'_>,
        psf: &ReferencePsf,
        adapter: &MorphologyAdapter,
        sender: &Sender<MorphologyRecord>,
    ) -> SourceOutcome {
        let idx = candidate.idx;
        let measured = panic::catch_unwind(AssertUnwindSafe(|| {
            self.measure_source(tile, candidate, rasters, psf, adapter)
        }));

        let (stage, reason) = match measured {
            Ok(Ok(record)) => match sender.send(record) {
                Ok(()) => {
                    info!("Done tile {tile} galaxy {idx}");
                    return SourceOutcome::Measured { idx };
                }
                Err(_) => (FailureStage::Queue, "results writer stopped".to_string()),
            },
            Ok(Err(SourceError::Cutout(e))) => (FailureStage::Cutout, e.to_string()),
            Ok(Err(SourceError::Measurement(e))) => (FailureStage::Measurement, e.to_string()),
            Err(payload) => (FailureStage::Panic, panic_message(payload.as_ref())),
        };

        error!("Error processing galaxy {idx} in tile {tile}: {reason}");
        SourceOutcome::Failed { idx, stage, reason }
    }

    fn measure_source(
        &self,
        tile: &TileId,
        candidate: &Candidate,
        rasters: &RasterSet<'_>,
        psf: &ReferencePsf,
        adapter: &MorphologyAdapter,
    ) -> Result<MorphologyRecord, SourceError> {
        let bundle = extract_cutout(&candidate.geometry(), rasters, psf, &self.cutout)?;
        debug!(
            "Galaxy {} cutout {:?} background median {:.4}",
            candidate.idx,
            bundle.image.dim(),
            bundle.background.median
        );

        let identity = SourceIdentity {
            tile: tile.clone(),
            idx: candidate.idx,
            ra: candidate.ra,
            dec: candidate.dec,
            fwhm: candidate.prediq,
        };
        Ok(adapter.measure(&bundle, &identity)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_workers_is_positive() {
        assert!(Dispatcher::default_workers() >= 1);
    }

    #[test]
    fn test_explicit_worker_count() {
        let dispatcher = Dispatcher::new(Some(2), CutoutConfig::default()).unwrap();
        assert_eq!(dispatcher.workers(), 2);

        let dispatcher = Dispatcher::new(Some(0), CutoutConfig::default()).unwrap();
        assert_eq!(dispatcher.workers(), 1);
    }

    #[test]
    fn test_panic_message() {
        let payload = panic::catch_unwind(|| panic!("bad pixel {}", 3)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "bad pixel 3");

        let payload = panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static");
    }

    #[test]
    fn test_outcome_accessors() {
        let summary = DispatchSummary {
            outcomes: vec![
                SourceOutcome::Measured { idx: 1 },
                SourceOutcome::Failed {
                    idx: 2,
                    stage: FailureStage::Cutout,
                    reason: "outside".into(),
                },
            ],
            written: 1,
            write_failures: 0,
        };
        assert_eq!(summary.measured(), 1);
        let failed: Vec<_> = summary.failures().map(SourceOutcome::idx).collect();
        assert_eq!(failed, vec![2]);
    }
}
