//! Tile worklists.

use std::path::{Path, PathBuf};

use log::{info, warn};
use thiserror::Error;

use crate::tile::TileId;

/// Name of the worklist column holding tile names
pub const TILE_COLUMN: &str = "tile";

#[derive(Error, Debug)]
pub enum WorklistError {
    #[error("failed to read worklist {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        source: csv::Error,
    },
    #[error("worklist {} has no 'tile' column", path.display())]
    MissingColumn { path: PathBuf },
}

/// Read the `tile` column of a CSV worklist, in file order.
///
/// Entries may be survey tile names (`CFIS_LSB.123.456.r`) or bare keys.
/// Entries that are neither are skipped with a warning.
pub fn load_worklist(path: &Path) -> Result<Vec<TileId>, WorklistError> {
    let csv_error = |source: csv::Error| WorklistError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_error)?;

    let column = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .position(|name| name == TILE_COLUMN)
        .ok_or_else(|| WorklistError::MissingColumn {
            path: path.to_path_buf(),
        })?;

    let mut tiles = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        let Some(entry) = record.get(column) else {
            continue;
        };
        match TileId::parse(entry) {
            Ok(tile) => tiles.push(tile),
            Err(e) => warn!("Skipping worklist entry: {e}"),
        }
    }
    info!("{} tiles in worklist {}", tiles.len(), path.display());
    Ok(tiles)
}

/// Parse tile ids given directly, e.g. on the command line.
pub fn parse_tiles<S: AsRef<str>>(entries: &[S]) -> Vec<TileId> {
    entries
        .iter()
        .filter_map(|entry| match TileId::parse(entry.as_ref()) {
            Ok(tile) => Some(tile),
            Err(e) => {
                warn!("Skipping tile: {e}");
                None
            }
        })
        .collect()
}
