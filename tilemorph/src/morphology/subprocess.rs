//! Morphology engine running an external measurement program.
//!
//! The cutout is written to a multi-extension FITS file (`IMAGE`, `SEGMAP`,
//! `WEIGHT`, `MASK`, `PSF`) in a private temporary directory next to a JSON
//! parameter file. The program is invoked as `<command..> <cutout.fits>
//! <params.json>` and must print a JSON document on stdout:
//!
//! ```json
//! {"quantities": {"gini": 0.51, ...}, "isophote_asymmetry": [0.1, ...],
//!  "flag": 0, "flag_sersic": 0}
//! ```
//!
//! `null` values are read as NaN.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;
use serde::{Deserialize, Serialize};
use shared::io::fits::write_typed_fits;
use shared::io::FitsDataType;

use super::{MeasurementRequest, MorphologyEngine, MorphologyError, MorphologyOutput};

#[derive(Serialize)]
struct EngineParams<'a> {
    target_label: u8,
    isophote_fluxes: &'a [f64],
    sersic_bounds: SersicBounds,
}

#[derive(Serialize)]
struct SersicBounds {
    n: (f64, f64),
}

#[derive(Deserialize)]
struct EngineResponse {
    #[serde(default)]
    quantities: HashMap<String, Option<f64>>,
    #[serde(default)]
    isophote_asymmetry: Vec<Option<f64>>,
    #[serde(default)]
    flag: i64,
    #[serde(default)]
    flag_sersic: i64,
}

impl From<EngineResponse> for MorphologyOutput {
    fn from(response: EngineResponse) -> Self {
        Self {
            quantities: response
                .quantities
                .into_iter()
                .map(|(name, value)| (name, value.unwrap_or(f64::NAN)))
                .collect(),
            isophote_asymmetry: response
                .isophote_asymmetry
                .into_iter()
                .map(|value| value.unwrap_or(f64::NAN))
                .collect(),
            flag: response.flag,
            flag_sersic: response.flag_sersic,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubprocessEngine {
    program: String,
    args: Vec<String>,
}

impl SubprocessEngine {
    /// `command` is the program followed by any leading arguments.
    pub fn new(command: &[String]) -> Result<Self, MorphologyError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| MorphologyError::Engine("empty morphology command".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn write_inputs(
        &self,
        request: &MeasurementRequest<'_>,
        dir: &Path,
    ) -> Result<(PathBuf, PathBuf), MorphologyError> {
        let fits_path = dir.join("cutout.fits");
        let mask = request.mask.mapv(u8::from);
        write_typed_fits(
            &fits_path,
            None,
            &[
                ("IMAGE", FitsDataType::Float64(request.image.to_owned())),
                ("SEGMAP", FitsDataType::UInt8(request.segmap.to_owned())),
                ("WEIGHT", FitsDataType::Float64(request.weight.to_owned())),
                ("MASK", FitsDataType::UInt8(mask)),
                ("PSF", FitsDataType::Float64(request.psf.to_owned())),
            ],
        )?;

        let params = EngineParams {
            target_label: request.target_label,
            isophote_fluxes: request.isophote_fluxes,
            sersic_bounds: SersicBounds {
                n: request.sersic_bounds,
            },
        };
        let params_path = dir.join("params.json");
        let json = serde_json::to_string(&params)
            .map_err(|e| MorphologyError::Malformed(format!("cannot encode parameters: {e}")))?;
        std::fs::write(&params_path, json)?;

        Ok((fits_path, params_path))
    }
}

impl MorphologyEngine for SubprocessEngine {
    fn measure(
        &self,
        request: &MeasurementRequest<'_>,
    ) -> Result<MorphologyOutput, MorphologyError> {
        let dir = tempfile::Builder::new().prefix("morph-").tempdir()?;
        let (fits_path, params_path) = self.write_inputs(request, dir.path())?;

        debug!("Running {} on {}", self.program, fits_path.display());
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&fits_path)
            .arg(&params_path)
            .output()
            .map_err(|source| MorphologyError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(MorphologyError::Failed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let response: EngineResponse = serde_json::from_slice(&output.stdout)
            .map_err(|e| MorphologyError::Malformed(e.to_string()))?;
        Ok(response.into())
    }
}
