//! Measure galaxy morphology across a list of survey tiles.
//!
//! Tiles come from a CSV worklist (`tile` column) and/or the command line.
//! Set `RUST_LOG=debug` for per-product staging details.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use tilemorph::args::RunArgs;
use tilemorph::logging::init_logging;
use tilemorph::worklist::{load_worklist, parse_tiles};
use tilemorph::{PipelineConfig, TileOrchestrator};

#[derive(Parser, Debug)]
#[command(
    name = "morph_tiles",
    about = "Measure galaxy morphology tile by tile",
    long_about = None
)]
struct Cli {
    #[command(flatten)]
    run: RunArgs,

    /// CSV worklist with a `tile` column
    #[arg(short, long)]
    worklist: Option<PathBuf>,

    /// Write the effective configuration as JSON to this path and exit
    #[arg(long)]
    dump_config: Option<PathBuf>,

    /// Tile ids (XXX.YYY) or survey tile names, processed after the worklist
    tiles: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.run.config {
        Some(path) => PipelineConfig::load_from_file(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    cli.run.apply(&mut config);
    config.validate()?;

    if let Some(path) = &cli.dump_config {
        config.save_to_file(path)?;
        println!("Configuration written to {}", path.display());
        return Ok(());
    }

    init_logging(config.paths.log_path.as_deref())?;

    let mut tiles = match &cli.worklist {
        Some(path) => load_worklist(path)?,
        None => Vec::new(),
    };
    tiles.extend(parse_tiles(&cli.tiles));
    if tiles.is_empty() {
        bail!("no tiles to process; pass tile ids or --worklist");
    }

    info!(
        "Processing {} tiles, staging in {}",
        tiles.len(),
        config.paths.work_dir.display()
    );
    let mut orchestrator =
        TileOrchestrator::from_config(config).context("setting up the pipeline")?;
    let summary = orchestrator.run(&tiles);

    println!(
        "{} tiles completed, {} failed, {} skipped",
        summary.completed, summary.failed, summary.skipped
    );
    Ok(())
}
