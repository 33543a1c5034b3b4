//! Processed-tile ledger: one completed tile id per line, append-only.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::warn;
use thiserror::Error;

use crate::tile::TileId;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger {} I/O error: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    done: HashSet<TileId>,
}

impl Ledger {
    /// Read the ledger at `path`; a missing file is an empty ledger.
    ///
    /// Lines that are not tile ids are skipped with a warning.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(source) => return Err(LedgerError::Io { path, source }),
        };

        let mut done = HashSet::new();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match TileId::parse(line) {
                Ok(tile) => {
                    done.insert(tile);
                }
                Err(e) => warn!("Ignoring ledger entry in {}: {e}", path.display()),
            }
        }
        Ok(Self { path, done })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, tile: &TileId) -> bool {
        self.done.contains(tile)
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }

    /// Append `tile` to the ledger file.
    pub fn record(&mut self, tile: &TileId) -> Result<(), LedgerError> {
        let io_error = |source: io::Error| LedgerError::Io {
            path: self.path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_error)?;
        writeln!(file, "{tile}").map_err(io_error)?;
        file.flush().map_err(io_error)?;
        self.done.insert(tile.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("done.txt")).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_record_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("done.txt");
        let a = TileId::parse("123.456").unwrap();
        let b = TileId::parse("CFIS_LSB.234.567.r").unwrap();

        let mut ledger = Ledger::open(&path).unwrap();
        ledger.record(&a).unwrap();
        ledger.record(&b).unwrap();
        assert!(ledger.contains(&a));

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "123.456\n234.567\n");
        let reopened = Ledger::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(reopened.contains(&b));
    }

    #[test]
    fn test_garbage_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("done.txt");
        std::fs::write(&path, "123.456\nnot-a-tile\n\n").unwrap();
        let ledger = Ledger::open(&path).unwrap();
        assert_eq!(ledger.len(), 1);
    }
}
