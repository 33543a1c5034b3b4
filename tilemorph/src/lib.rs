//! Tile-by-tile structural morphology pipeline for wide-field survey imagery.
//!
//! A run walks a worklist of survey tiles. Each tile's products are staged
//! into a local working directory ([`staging`]), candidate galaxies are
//! selected from its catalogs ([`catalog`]), and every candidate is cut out of
//! the tile rasters and measured in parallel ([`dispatch`], [`morphology`]).
//! Results are appended to a single CSV catalog ([`results`]) and completed
//! tiles to a ledger ([`ledger`]) so an interrupted run can resume.

pub mod args;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod ledger;
pub mod logging;
pub mod morphology;
pub mod orchestrator;
pub mod results;
pub mod staging;
pub mod tile;
pub mod worklist;

pub use config::PipelineConfig;
pub use orchestrator::{RunSummary, TileOrchestrator, TileOutcome};
pub use tile::TileId;
