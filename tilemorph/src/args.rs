//! Command line arguments shared by the pipeline binaries.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::config::{PipelineConfig, StoreBackend};

/// Parse a duration such as `30s`, `500ms`, `2m` or `1h`; bare numbers are seconds.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (number, seconds_per_unit) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1e-3)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1.0)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60.0)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3600.0)
    } else {
        (s, 1.0)
    };

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("Invalid numeric value: {number}"))?;
    Duration::try_from_secs_f64(value * seconds_per_unit)
        .map_err(|e| format!("Invalid duration {s}: {e}"))
}

/// Duration argument accepting unit suffixes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DurationArg(pub Duration);

impl std::str::FromStr for DurationArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_duration(s).map(DurationArg)
    }
}

impl std::fmt::Display for DurationArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let millis = self.0.as_millis();
        if millis >= 1000 && millis % 1000 == 0 {
            write!(f, "{}s", millis / 1000)
        } else if millis >= 1000 {
            write!(f, "{:.3}s", self.0.as_secs_f64())
        } else {
            write!(f, "{millis}ms")
        }
    }
}

/// Overrides applied on top of the configuration file.
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// JSON configuration file; built-in defaults when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory tile products are staged into
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Output catalog
    #[arg(long)]
    pub results: Option<PathBuf>,

    /// Processed-tile ledger
    #[arg(long)]
    pub ledger: Option<PathBuf>,

    /// Also write log records to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Fetch products from a filesystem mirror of the object store
    #[arg(long, conflicts_with = "http_base_url")]
    pub mirror_root: Option<PathBuf>,

    /// Fetch products over HTTP from this base URL
    #[arg(long)]
    pub http_base_url: Option<String>,

    /// Dataset root of the remote products
    #[arg(long)]
    pub dataset: Option<String>,

    /// Transfer timeout (e.g. "30s", "5m")
    #[arg(long)]
    pub timeout: Option<DurationArg>,

    /// Worker threads per tile
    #[arg(short = 'j', long)]
    pub workers: Option<usize>,

    /// Stop after this many tiles
    #[arg(long)]
    pub max_tiles: Option<usize>,

    /// Reprocess tiles already in the ledger
    #[arg(long, default_value_t = false)]
    pub ignore_ledger: bool,

    /// Also stage the photo-z catalog
    #[arg(long, default_value_t = false)]
    pub photoz: bool,

    /// Reference PSF FITS file
    #[arg(long)]
    pub psf: Option<PathBuf>,

    /// Program decompressing .fz products
    #[arg(long)]
    pub decompressor: Option<String>,

    /// Morphology command and its leading arguments
    #[arg(long, num_args = 1.., allow_hyphen_values = true)]
    pub morphology_command: Option<Vec<String>>,
}

impl RunArgs {
    /// Apply the given overrides to `config`.
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(dir) = &self.work_dir {
            config.paths.work_dir = dir.clone();
        }
        if let Some(path) = &self.results {
            config.paths.results_path = path.clone();
        }
        if let Some(path) = &self.ledger {
            config.paths.ledger_path = path.clone();
        }
        if let Some(path) = &self.log_file {
            config.paths.log_path = Some(path.clone());
        }
        if let Some(root) = &self.mirror_root {
            config.store.backend = StoreBackend::Mirror { root: root.clone() };
        }
        if let Some(base_url) = &self.http_base_url {
            config.store.backend = StoreBackend::Http {
                base_url: base_url.clone(),
            };
        }
        if let Some(dataset) = &self.dataset {
            config.store.dataset = dataset.clone();
        }
        if let Some(timeout) = self.timeout {
            config.store.timeout_secs = Some(timeout.0.as_secs_f64());
        }
        if let Some(workers) = self.workers {
            config.workers = Some(workers);
        }
        if let Some(max) = self.max_tiles {
            config.max_tiles = Some(max);
        }
        if self.ignore_ledger {
            config.honor_ledger = false;
        }
        if self.photoz {
            config.include_photoz = true;
        }
        if let Some(psf) = &self.psf {
            config.psf.reference_path = psf.clone();
        }
        if let Some(program) = &self.decompressor {
            config.decompressor = program.clone();
        }
        if let Some(command) = &self.morphology_command {
            config.morphology_command = command.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        run: RunArgs,
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("1e300s").is_err());
        assert!(parse_duration("NaN").is_err());
        assert!("1e300h".parse::<DurationArg>().is_err());
    }

    #[test]
    fn test_duration_display() {
        assert_eq!(DurationArg(Duration::from_secs(30)).to_string(), "30s");
        assert_eq!(DurationArg(Duration::from_millis(1500)).to_string(), "1.500s");
        assert_eq!(DurationArg(Duration::from_millis(250)).to_string(), "250ms");
    }

    #[test]
    fn test_overrides_apply() {
        let cli = TestCli::parse_from([
            "morph_tiles",
            "--work-dir",
            "/tmp/stage",
            "--http-base-url",
            "https://vault.example/data",
            "--timeout",
            "2m",
            "-j",
            "4",
            "--ignore-ledger",
            "--morphology-command",
            "python3",
            "measure_morphology.py",
        ]);

        let mut config = PipelineConfig::default();
        cli.run.apply(&mut config);
        assert_eq!(config.paths.work_dir, PathBuf::from("/tmp/stage"));
        assert_eq!(
            config.store.backend,
            StoreBackend::Http {
                base_url: "https://vault.example/data".to_string()
            }
        );
        assert_eq!(config.store.timeout(), Some(Duration::from_secs(120)));
        assert_eq!(config.workers, Some(4));
        assert!(!config.honor_ledger);
        assert_eq!(config.morphology_command, vec!["python3", "measure_morphology.py"]);
    }

    #[test]
    fn test_no_overrides_keep_config() {
        let cli = TestCli::parse_from(["morph_tiles"]);
        let mut config = PipelineConfig::default();
        cli.run.apply(&mut config);
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_store_flags_conflict() {
        let result = TestCli::try_parse_from([
            "morph_tiles",
            "--mirror-root",
            "/arc",
            "--http-base-url",
            "https://vault.example",
        ]);
        assert!(result.is_err());
    }
}
