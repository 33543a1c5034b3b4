use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use thiserror::Error;

use super::{
    partial_path, DecompressError, Decompressor, ObjectStore, ProductKind, StoreError,
    COMPRESSED_SUFFIX,
};
use crate::tile::TileId;

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("failed to fetch {kind} from {remote}: {source}")]
    Fetch {
        kind: ProductKind,
        remote: String,
        source: StoreError,
    },
    #[error("failed to decompress {kind}: {source}")]
    Decompress {
        kind: ProductKind,
        source: DecompressError,
    },
    #[error("I/O error in working directory: {0}")]
    Io(#[from] io::Error),
    #[error("{0} was not staged")]
    NotStaged(ProductKind),
}

/// Local paths of the products staged for one tile.
#[derive(Debug, Clone, Default)]
pub struct StagedProducts {
    paths: BTreeMap<ProductKind, PathBuf>,
}

impl StagedProducts {
    pub fn get(&self, kind: ProductKind) -> Option<&Path> {
        self.paths.get(&kind).map(PathBuf::as_path)
    }

    /// Path of a product that must have been staged.
    pub fn require(&self, kind: ProductKind) -> Result<&Path, StagingError> {
        self.get(kind).ok_or(StagingError::NotStaged(kind))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Fetch-or-skip cache of tile products in a local working directory.
///
/// Holds no locks; one cache (and one orchestrator) per working directory.
pub struct ResourceCache {
    work_dir: PathBuf,
    dataset: String,
    store: Box<dyn ObjectStore>,
    decompressor: Box<dyn Decompressor>,
}

impl ResourceCache {
    pub fn new(
        work_dir: impl Into<PathBuf>,
        dataset: impl Into<String>,
        store: Box<dyn ObjectStore>,
        decompressor: Box<dyn Decompressor>,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            dataset: dataset.into(),
            store,
            decompressor,
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Local path a product of `tile` is staged to.
    pub fn local_path(&self, tile: &TileId, kind: ProductKind) -> PathBuf {
        self.work_dir.join(kind.local_file_name(tile))
    }

    fn compressed_path(&self, tile: &TileId, kind: ProductKind) -> PathBuf {
        self.work_dir
            .join(format!("{}{COMPRESSED_SUFFIX}", kind.local_file_name(tile)))
    }

    /// Make sure every wanted product of `tile` is present locally.
    ///
    /// Products already present are not fetched again. An unavailable optional
    /// product is logged and left out of the result; any other failure is
    /// returned.
    pub fn ensure(
        &self,
        tile: &TileId,
        wants: &[ProductKind],
    ) -> Result<StagedProducts, StagingError> {
        fs::create_dir_all(&self.work_dir)?;

        let mut staged = StagedProducts::default();
        for &kind in wants {
            let path = if kind.is_optional() {
                match self.ensure_one(tile, kind) {
                    Ok(path) => Some(path),
                    Err(e) => {
                        warn!("{kind} for tile {tile} unavailable: {e}");
                        None
                    }
                }
            } else {
                Some(self.ensure_one(tile, kind)?)
            };
            if let Some(path) = path {
                staged.paths.insert(kind, path);
            }
        }
        Ok(staged)
    }

    fn ensure_one(&self, tile: &TileId, kind: ProductKind) -> Result<PathBuf, StagingError> {
        let local = self.local_path(tile, kind);
        if local.exists() {
            debug!("{kind} for tile {tile} already staged at {}", local.display());
            return Ok(local);
        }

        let target = if kind.is_compressed() {
            self.compressed_path(tile, kind)
        } else {
            local.clone()
        };
        self.fetch(tile, kind, &target)?;

        if kind.is_compressed() {
            self.decompress_into(kind, &target, &local)?;
            fs::remove_file(&target)?;
        }

        info!("Staged {kind} for tile {tile}");
        Ok(local)
    }

    /// Decompress through a `.part` file renamed into place once complete.
    fn decompress_into(
        &self,
        kind: ProductKind,
        compressed: &Path,
        local: &Path,
    ) -> Result<(), StagingError> {
        let part = partial_path(local);
        match fs::remove_file(&part) {
            Ok(()) => debug!("Removed stale {}", part.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let result = self
            .decompressor
            .decompress(compressed, &part)
            .map_err(|source| StagingError::Decompress { kind, source })
            .and_then(|()| fs::rename(&part, local).map_err(StagingError::from));
        if result.is_err() {
            let _ = fs::remove_file(&part);
        }
        result
    }

    /// Try each remote naming variant in turn, moving on only when one is not found.
    fn fetch(&self, tile: &TileId, kind: ProductKind, target: &Path) -> Result<(), StagingError> {
        let remotes = kind.remote_paths(&self.dataset, tile);
        for remote in &remotes {
            match self.store.copy(remote, target) {
                Ok(()) => return Ok(()),
                Err(StoreError::NotFound(_)) => debug!("{remote} not found"),
                Err(source) => {
                    return Err(StagingError::Fetch {
                        kind,
                        remote: remote.clone(),
                        source,
                    })
                }
            }
        }

        let tried = remotes.join(", ");
        Err(StagingError::Fetch {
            kind,
            remote: tried.clone(),
            source: StoreError::NotFound(tried),
        })
    }

    /// Delete the local copies of `kinds` for `tile`.
    ///
    /// Best-effort: individual failures are logged. Returns the number of files removed.
    pub fn purge(&self, tile: &TileId, kinds: &[ProductKind]) -> usize {
        let mut removed = 0;
        for &kind in kinds {
            let mut candidates = vec![self.local_path(tile, kind)];
            if kind.is_compressed() {
                candidates.push(self.compressed_path(tile, kind));
                candidates.push(partial_path(&self.local_path(tile, kind)));
            }
            for path in candidates {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => warn!("Failed to remove {}: {e}", path.display()),
                }
            }
        }
        debug!("Purged {removed} files for tile {tile}");
        removed
    }
}
