//! Tile-by-tile driver.
//!
//! For each tile: stage products, select candidates, load the rasters,
//! dispatch the candidates, record the tile in the ledger and purge the staged
//! products. Any error before the purge fails only that tile; the run moves on
//! to the next one.

use log::{error, info, warn};
use shared::image_proc::{CutoutError, PsfError, RasterSet, ReferencePsf};
use shared::io::fits::{read_image_f32, read_image_i32};
use shared::io::FitsError;
use thiserror::Error;

use crate::catalog::{self, CatalogError};
use crate::config::{ConfigError, PipelineConfig, StoreBackend};
use crate::dispatch::{DispatchError, Dispatcher};
use crate::ledger::{Ledger, LedgerError};
use crate::morphology::{MorphologyAdapter, MorphologyEngine, MorphologyError, SubprocessEngine};
use crate::results::{ResultsError, ResultsWriter};
use crate::staging::{
    FunpackDecompressor, HttpObjectStore, MirrorObjectStore, ObjectStore, ProductKind,
    ResourceCache, StagingError,
};
use crate::tile::TileId;

#[derive(Error, Debug)]
pub enum TileError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("failed to read raster: {0}")]
    Raster(#[from] FitsError),
    #[error(transparent)]
    Cutout(#[from] CutoutError),
    #[error("failed to load reference PSF: {0}")]
    Psf(#[from] PsfError),
    #[error(transparent)]
    Morphology(#[from] MorphologyError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Results(#[from] ResultsError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TileOutcome {
    Completed { candidates: usize, measured: usize },
    Failed { reason: String },
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: usize,
    /// Tiles skipped because the ledger already had them
    pub skipped: usize,
    pub outcomes: Vec<(TileId, TileOutcome)>,
}

impl RunSummary {
    pub fn attempted(&self) -> usize {
        self.completed + self.failed
    }
}

pub struct TileOrchestrator {
    config: PipelineConfig,
    cache: ResourceCache,
    adapter: MorphologyAdapter,
    psf: ReferencePsf,
    dispatcher: Dispatcher,
    ledger: Ledger,
    results: ResultsWriter,
}

impl TileOrchestrator {
    /// Assemble an orchestrator from already built collaborators.
    pub fn new(
        config: PipelineConfig,
        cache: ResourceCache,
        engine: Box<dyn MorphologyEngine>,
        psf: ReferencePsf,
    ) -> Result<Self, TileError> {
        config.validate()?;
        let adapter =
            MorphologyAdapter::new(engine, config.isophotes.schedule(), config.sersic_bounds);
        let dispatcher = Dispatcher::new(config.workers, config.cutout.to_cutout_config())?;
        let ledger = Ledger::open(&config.paths.ledger_path)?;
        let results = ResultsWriter::open(&config.paths.results_path)?;
        info!(
            "Ledger {} lists {} processed tiles",
            ledger.path().display(),
            ledger.len()
        );

        Ok(Self {
            config,
            cache,
            adapter,
            psf,
            dispatcher,
            ledger,
            results,
        })
    }

    /// Build the production collaborators described by `config`.
    pub fn from_config(config: PipelineConfig) -> Result<Self, TileError> {
        config.validate()?;
        let store: Box<dyn ObjectStore> = match &config.store.backend {
            StoreBackend::Http { base_url } => {
                Box::new(HttpObjectStore::new(base_url, config.store.timeout()))
            }
            StoreBackend::Mirror { root } => Box::new(MirrorObjectStore::new(root)),
        };
        let cache = ResourceCache::new(
            &config.paths.work_dir,
            &config.store.dataset,
            store,
            Box::new(FunpackDecompressor::new(&config.decompressor)),
        );
        let engine = SubprocessEngine::new(&config.morphology_command)?;
        let psf = ReferencePsf::load(&config.psf.reference_path, config.psf.reference_fwhm)?;
        Self::new(config, cache, Box::new(engine), psf)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    fn wanted_products(&self) -> Vec<ProductKind> {
        let mut wants = ProductKind::MANDATORY.to_vec();
        if self.config.include_photoz {
            wants.push(ProductKind::PhotoZ);
        }
        wants
    }

    /// Process every tile in order, honoring the ledger and `max_tiles`.
    pub fn run(&mut self, tiles: &[TileId]) -> RunSummary {
        let mut summary = RunSummary::default();
        for tile in tiles {
            if let Some(max) = self.config.max_tiles {
                if summary.attempted() >= max {
                    info!("Reached the limit of {max} tiles");
                    break;
                }
            }
            if self.config.honor_ledger && self.ledger.contains(tile) {
                info!("Skipping tile {tile}: already processed");
                summary.skipped += 1;
                continue;
            }

            let outcome = self.process_tile(tile);
            match outcome {
                TileOutcome::Completed { .. } => summary.completed += 1,
                TileOutcome::Failed { .. } => summary.failed += 1,
            }
            summary.outcomes.push((tile.clone(), outcome));
        }

        info!(
            "Run finished: {} tiles completed, {} failed, {} skipped",
            summary.completed, summary.failed, summary.skipped
        );
        summary
    }

    /// Process one tile; errors are logged and reported, never propagated.
    pub fn process_tile(&mut self, tile: &TileId) -> TileOutcome {
        info!("Processing tile {tile}");
        match self.try_process_tile(tile) {
            Ok((candidates, measured)) => {
                info!("Finished tile {tile}: {measured} of {candidates} galaxies measured");
                TileOutcome::Completed {
                    candidates,
                    measured,
                }
            }
            Err(e) => {
                error!("Error processing tile {tile}: {e}");
                TileOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn try_process_tile(&mut self, tile: &TileId) -> Result<(usize, usize), TileError> {
        let wants = self.wanted_products();
        let staged = self.cache.ensure(tile, &wants)?;

        let selection = catalog::select(
            staged.require(ProductKind::Catalog)?,
            staged.require(ProductKind::StarGalaxy)?,
            &self.config.selection,
        )?;

        let summary = {
            let hdus = self.config.hdus;
            let image = read_image_f32(staged.require(ProductKind::Image)?, hdus.image)?;
            let weight = read_image_f32(staged.require(ProductKind::Weight)?, hdus.weight)?;
            let segmentation =
                read_image_i32(staged.require(ProductKind::Segmentation)?, hdus.segmentation)?;
            let rasters = RasterSet::new(image.view(), weight.view(), segmentation.view())?;

            self.dispatcher.run(
                tile,
                &selection.candidates,
                &rasters,
                &self.psf,
                &self.adapter,
                &mut self.results,
            )
        };
        if summary.write_failures > 0 {
            warn!(
                "{} measured galaxies of tile {tile} could not be written",
                summary.write_failures
            );
        }

        self.ledger.record(tile)?;
        self.cache.purge(tile, &wants);
        Ok((selection.candidates.len(), summary.measured()))
    }
}
