use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecompressError {
    #[error("failed to run {program}: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("{program} succeeded but {} was not produced", output.display())]
    MissingOutput { program: String, output: PathBuf },
}

/// Turns a compressed product into an uncompressed file.
pub trait Decompressor: Send + Sync {
    /// Decompress `compressed` into `output`, leaving the input in place.
    ///
    /// `output` may hold a partial file when this fails.
    fn decompress(&self, compressed: &Path, output: &Path) -> Result<(), DecompressError>;
}

/// Runs the CFITSIO `funpack` utility (or a compatible program) as
/// `funpack -O <output> <compressed>`.
#[derive(Debug, Clone)]
pub struct FunpackDecompressor {
    program: String,
}

impl FunpackDecompressor {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for FunpackDecompressor {
    fn default() -> Self {
        Self::new("funpack")
    }
}

impl Decompressor for FunpackDecompressor {
    fn decompress(&self, compressed: &Path, output: &Path) -> Result<(), DecompressError> {
        debug!(
            "{} -O {} {}",
            self.program,
            output.display(),
            compressed.display()
        );

        let result = Command::new(&self.program)
            .arg("-O")
            .arg(output)
            .arg(compressed)
            .output()
            .map_err(|source| DecompressError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !result.status.success() {
            return Err(DecompressError::Failed {
                program: self.program.clone(),
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        if !output.exists() {
            return Err(DecompressError::MissingOutput {
                program: self.program.clone(),
                output: output.to_path_buf(),
            });
        }
        Ok(())
    }
}
