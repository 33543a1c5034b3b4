//! Pipeline configuration.
//!
//! Every tunable of a run lives in [`PipelineConfig`]. The `Default` impl
//! reproduces the survey's standard settings; a JSON file may override any
//! subset of fields and command-line arguments are applied on top of that.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shared::algo::SigmaClip;
use shared::image_proc::CutoutConfig;
use thiserror::Error;

use crate::catalog::SelectionCriteria;
use crate::morphology::IsophoteSchedule;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Working directory tile products are staged into
    pub work_dir: PathBuf,
    /// Output catalog, appended to across runs
    pub results_path: PathBuf,
    /// Processed-tile ledger
    pub ledger_path: PathBuf,
    /// Optional log file, written in addition to stderr
    pub log_path: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/scratch"),
            results_path: PathBuf::from("morphology.csv"),
            ledger_path: PathBuf::from("processed_tiles.txt"),
            log_path: None,
        }
    }
}

/// Where remote products come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreBackend {
    Http { base_url: String },
    Mirror { root: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// First path component of every remote product
    pub dataset: String,
    /// Global timeout per HTTP transfer; none when unset
    pub timeout_secs: Option<f64>,
}

impl StoreConfig {
    /// Transfer timeout; `None` when unset or not a valid duration (rejected by `validate`).
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Mirror {
                root: PathBuf::from("/arc/projects"),
            },
            dataset: "cfis".to_string(),
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CutoutSettings {
    pub min_size: usize,
    pub radius_factor: f64,
    pub clip_sigma: f64,
    pub clip_iters: usize,
}

impl Default for CutoutSettings {
    fn default() -> Self {
        let defaults = CutoutConfig::default();
        Self {
            min_size: defaults.min_size,
            radius_factor: defaults.radius_factor,
            clip_sigma: defaults.clip.sigma,
            clip_iters: defaults.clip.max_iters,
        }
    }
}

impl CutoutSettings {
    pub fn to_cutout_config(&self) -> CutoutConfig {
        CutoutConfig {
            min_size: self.min_size,
            radius_factor: self.radius_factor,
            clip: SigmaClip {
                sigma: self.clip_sigma,
                max_iters: self.clip_iters,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PsfSettings {
    /// FITS file holding the reference kernel in its primary HDU
    pub reference_path: PathBuf,
    /// FWHM of the reference kernel in arcseconds
    pub reference_fwhm: f64,
}

impl Default for PsfSettings {
    fn default() -> Self {
        Self {
            reference_path: PathBuf::from("psf_1arcsec.fits"),
            reference_fwhm: 1.0,
        }
    }
}

/// Surface-brightness levels at which isophotal asymmetry is measured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsophoteSettings {
    /// Brightest level, mag/arcsec²
    pub start: f64,
    /// Faintest level (inclusive), mag/arcsec²
    pub stop: f64,
    pub step: f64,
    /// Arcseconds per pixel
    pub pixel_scale: f64,
    pub zero_point: f64,
}

impl Default for IsophoteSettings {
    fn default() -> Self {
        Self {
            start: 22.0,
            stop: 26.0,
            step: 0.5,
            pixel_scale: 0.1857,
            zero_point: 30.0,
        }
    }
}

impl IsophoteSettings {
    pub fn schedule(&self) -> IsophoteSchedule {
        IsophoteSchedule::new(
            self.start,
            self.stop,
            self.step,
            self.pixel_scale,
            self.zero_point,
        )
    }
}

/// HDU index of each raster within its FITS file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HduSettings {
    pub image: usize,
    pub weight: usize,
    pub segmentation: usize,
}

impl Default for HduSettings {
    fn default() -> Self {
        Self {
            image: 0,
            weight: 1,
            segmentation: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub store: StoreConfig,
    /// Program used to decompress `.fz` products
    pub decompressor: String,
    pub cutout: CutoutSettings,
    pub psf: PsfSettings,
    pub isophotes: IsophoteSettings,
    /// Lower and upper bound of the Sérsic index fit
    pub sersic_bounds: (f64, f64),
    pub selection: SelectionCriteria,
    pub hdus: HduSettings,
    /// Worker threads per tile; defaults to one less than the CPU count
    pub workers: Option<usize>,
    /// Skip tiles already recorded in the ledger
    pub honor_ledger: bool,
    /// Also stage the optional photo-z catalog
    pub include_photoz: bool,
    /// Stop after attempting this many tiles
    pub max_tiles: Option<usize>,
    /// Command (program and leading arguments) running the morphology measurement
    pub morphology_command: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            store: StoreConfig::default(),
            decompressor: "funpack".to_string(),
            cutout: CutoutSettings::default(),
            psf: PsfSettings::default(),
            isophotes: IsophoteSettings::default(),
            sersic_bounds: (0.1, 6.0),
            selection: SelectionCriteria::default(),
            hdus: HduSettings::default(),
            workers: None,
            honor_ledger: true,
            include_photoz: false,
            max_tiles: None,
            morphology_command: vec!["statmorph-measure".to_string()],
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file; absent fields keep their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save as pretty-printed JSON
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |source: std::io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io_error(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        std::fs::write(path, json).map_err(io_error)
    }

    /// Check the settings for values no run could work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.cutout.min_size == 0 {
            return invalid("cutout.min_size must be at least 1".to_string());
        }
        if !(self.cutout.radius_factor > 0.0) {
            return invalid(format!(
                "cutout.radius_factor must be positive, got {}",
                self.cutout.radius_factor
            ));
        }
        if !(self.psf.reference_fwhm > 0.0) {
            return invalid(format!(
                "psf.reference_fwhm must be positive, got {}",
                self.psf.reference_fwhm
            ));
        }
        let iso = &self.isophotes;
        if !(iso.step > 0.0) || iso.stop < iso.start {
            return invalid(format!(
                "isophote levels {}..={} step {} are empty",
                iso.start, iso.stop, iso.step
            ));
        }
        if !(iso.pixel_scale > 0.0) {
            return invalid(format!("pixel_scale must be positive, got {}", iso.pixel_scale));
        }
        let (lo, hi) = self.sersic_bounds;
        if !(lo > 0.0 && lo < hi) {
            return invalid(format!("sersic_bounds ({lo}, {hi}) are not an increasing positive range"));
        }
        if self.workers == Some(0) {
            return invalid("workers must be at least 1".to_string());
        }
        if self.morphology_command.is_empty() {
            return invalid("morphology_command is empty".to_string());
        }
        if self.store.dataset.is_empty() {
            return invalid("store.dataset is empty".to_string());
        }
        if let Some(secs) = self.store.timeout_secs {
            if let Err(e) = Duration::try_from_secs_f64(secs) {
                return invalid(format!("store.timeout_secs {secs} is not a valid duration: {e}"));
            }
        }
        Ok(())
    }
}
