//! Remote object stores.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use thiserror::Error;

use super::partial_path;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("remote object not found: {0}")]
    NotFound(String),
    #[error("transfer of {path} failed: {reason}")]
    Transport { path: String, reason: String },
    #[error("local I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Get-by-path access to the survey's object storage.
pub trait ObjectStore: Send + Sync {
    /// Copy the object at `remote` to the local file `local`.
    ///
    /// A missing object is reported as [`StoreError::NotFound`].
    fn copy(&self, remote: &str, local: &Path) -> Result<(), StoreError>;
}

/// Write `reader` to `local` through a `.part` file renamed into place once complete.
fn write_atomically<R: io::Read>(reader: &mut R, local: &Path) -> Result<u64, StoreError> {
    let part = partial_path(local);
    let result = (|| -> io::Result<u64> {
        let mut writer = BufWriter::new(File::create(&part)?);
        let bytes = io::copy(reader, &mut writer)?;
        writer.flush()?;
        drop(writer);
        fs::rename(&part, local)?;
        Ok(bytes)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&part);
    }
    Ok(result?)
}

/// Object store reached over HTTP(S), e.g. a web front-end of the survey vault.
pub struct HttpObjectStore {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpObjectStore {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(timeout)
            .build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent: config.into(),
        }
    }

    pub fn url_for(&self, remote: &str) -> String {
        format!("{}/{}", self.base_url, remote.trim_start_matches('/'))
    }
}

impl ObjectStore for HttpObjectStore {
    fn copy(&self, remote: &str, local: &Path) -> Result<(), StoreError> {
        let url = self.url_for(remote);
        debug!("GET {url}");

        let response = match self.agent.get(&url).call() {
            Ok(response) => response,
            Err(ureq::Error::StatusCode(404)) => return Err(StoreError::NotFound(remote.to_string())),
            Err(e) => {
                return Err(StoreError::Transport {
                    path: remote.to_string(),
                    reason: e.to_string(),
                })
            }
        };

        let mut reader = response.into_body().into_reader();
        let bytes = write_atomically(&mut reader, local)?;
        debug!("Fetched {bytes} bytes to {}", local.display());
        Ok(())
    }
}

/// Object store mounted on the local filesystem.
#[derive(Debug, Clone)]
pub struct MirrorObjectStore {
    root: PathBuf,
}

impl MirrorObjectStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ObjectStore for MirrorObjectStore {
    fn copy(&self, remote: &str, local: &Path) -> Result<(), StoreError> {
        let source = self.root.join(remote.trim_start_matches('/'));
        let mut file = match File::open(&source) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(remote.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        write_atomically(&mut file, local)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_mirror_copy() {
        let mirror = tempdir().unwrap();
        let work = tempdir().unwrap();
        fs::create_dir_all(mirror.path().join("cfis/tiles")).unwrap();
        fs::write(mirror.path().join("cfis/tiles/a.fits"), b"payload").unwrap();

        let store = MirrorObjectStore::new(mirror.path());
        let local = work.path().join("a.fits");
        store.copy("cfis/tiles/a.fits", &local).unwrap();

        assert_eq!(fs::read(&local).unwrap(), b"payload");
        assert!(!partial_path(&local).exists());
    }

    #[test]
    fn test_mirror_missing_is_not_found() {
        let mirror = tempdir().unwrap();
        let work = tempdir().unwrap();
        let store = MirrorObjectStore::new(mirror.path());
        let local = work.path().join("missing.fits");

        let result = store.copy("cfis/missing.fits", &local);
        assert!(matches!(result, Err(StoreError::NotFound(ref p)) if p == "cfis/missing.fits"));
        assert!(!local.exists());
    }

    #[test]
    fn test_failed_write_leaves_nothing_behind() {
        let work = tempdir().unwrap();
        let local = work.path().join("no_such_dir").join("a.fits");
        let mut data: &[u8] = b"abc";
        assert!(write_atomically(&mut data, &local).is_err());
        assert!(!local.exists());
        assert!(!partial_path(&local).exists());
    }

    #[test]
    fn test_http_url_joining() {
        let store = HttpObjectStore::new("https://example.org/vault/", None);
        assert_eq!(
            store.url_for("cfis/tiles_DR5/x.cat"),
            "https://example.org/vault/cfis/tiles_DR5/x.cat"
        );
    }
}
