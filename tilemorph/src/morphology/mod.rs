//! Structural morphology measurement of cutouts.
//!
//! The measurement itself is an external capability behind
//! [`MorphologyEngine`]. [`MorphologyAdapter`] hands a cutout bundle to the
//! engine together with the isophote schedule and Sérsic bounds, and flattens
//! the structured result into a [`MorphologyRecord`].

mod isophotes;
mod record;
mod subprocess;

pub use isophotes::IsophoteSchedule;
pub use record::{FieldValue, MorphologyRecord, SourceIdentity};
pub use subprocess::SubprocessEngine;

use std::collections::HashMap;

use ndarray::ArrayView2;
use shared::image_proc::segmentation::TARGET;
use shared::image_proc::CutoutBundle;
use shared::io::FitsError;
use thiserror::Error;

/// Scalar quantities every record carries, in output order
pub const QUANTITY_NAMES: &[&str] = &[
    "xc_centroid",
    "yc_centroid",
    "ellipticity_centroid",
    "elongation_centroid",
    "orientation_centroid",
    "xc_asymmetry",
    "yc_asymmetry",
    "ellipticity_asymmetry",
    "elongation_asymmetry",
    "orientation_asymmetry",
    "rpetro_circ",
    "rpetro_ellip",
    "rhalf_circ",
    "rhalf_ellip",
    "r20",
    "r50",
    "r80",
    "gini",
    "m20",
    "gini_m20_bulge",
    "gini_m20_merger",
    "sn_per_pixel",
    "concentration",
    "asymmetry",
    "smoothness",
    "multimode",
    "intensity",
    "deviation",
    "outer_asymmetry",
    "shape_asymmetry",
    "sersic_amplitude",
    "sersic_rhalf",
    "sersic_n",
    "sersic_xc",
    "sersic_yc",
    "sersic_ellip",
    "sersic_theta",
    "sersic_chi2_dof",
    "sky_mean",
    "sky_median",
    "sky_sigma",
    "flux_circ",
    "flux_ellip",
    "nx_stamp",
    "ny_stamp",
];

#[derive(Error, Debug)]
pub enum MorphologyError {
    #[error("engine reported {found} isophote asymmetries, expected {expected}")]
    IsophoteCount { expected: usize, found: usize },
    #[error("failed to stage cutout for the engine: {0}")]
    Fits(#[from] FitsError),
    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("malformed engine output: {0}")]
    Malformed(String),
    #[error("measurement failed: {0}")]
    Engine(String),
}

/// Inputs of one measurement, borrowed from a cutout bundle.
#[derive(Debug, Clone, Copy)]
pub struct MeasurementRequest<'a> {
    pub image: ArrayView2<'a, f64>,
    pub segmap: ArrayView2<'a, u8>,
    /// Segmentation label of the source to measure
    pub target_label: u8,
    /// Weight map used as the error map
    pub weight: ArrayView2<'a, f64>,
    pub mask: ArrayView2<'a, bool>,
    pub psf: ArrayView2<'a, f64>,
    /// Pixel flux thresholds for isophotal asymmetry
    pub isophote_fluxes: &'a [f64],
    /// Sérsic index bounds `(min, max)`
    pub sersic_bounds: (f64, f64),
}

/// Structured result of one measurement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MorphologyOutput {
    pub quantities: HashMap<String, f64>,
    /// One value per isophote flux, in schedule order
    pub isophote_asymmetry: Vec<f64>,
    pub flag: i64,
    pub flag_sersic: i64,
}

/// A structural morphology measurement routine.
///
/// Shared by all workers of a tile, hence `Send + Sync`.
pub trait MorphologyEngine: Send + Sync {
    fn measure(&self, request: &MeasurementRequest<'_>) -> Result<MorphologyOutput, MorphologyError>;
}

pub struct MorphologyAdapter {
    engine: Box<dyn MorphologyEngine>,
    schedule: IsophoteSchedule,
    sersic_bounds: (f64, f64),
}

impl MorphologyAdapter {
    pub fn new(
        engine: Box<dyn MorphologyEngine>,
        schedule: IsophoteSchedule,
        sersic_bounds: (f64, f64),
    ) -> Self {
        Self {
            engine,
            schedule,
            sersic_bounds,
        }
    }

    pub fn schedule(&self) -> &IsophoteSchedule {
        &self.schedule
    }

    /// Measure one cutout and flatten the result. No retry on failure.
    pub fn measure(
        &self,
        bundle: &CutoutBundle,
        identity: &SourceIdentity,
    ) -> Result<MorphologyRecord, MorphologyError> {
        let request = MeasurementRequest {
            image: bundle.image.view(),
            segmap: bundle.segmap.view(),
            target_label: TARGET,
            weight: bundle.error.view(),
            mask: bundle.mask.view(),
            psf: bundle.psf.view(),
            isophote_fluxes: self.schedule.fluxes(),
            sersic_bounds: self.sersic_bounds,
        };
        let output = self.engine.measure(&request)?;

        if output.isophote_asymmetry.len() != self.schedule.len() {
            return Err(MorphologyError::IsophoteCount {
                expected: self.schedule.len(),
                found: output.isophote_asymmetry.len(),
            });
        }
        Ok(MorphologyRecord::flatten(identity, &output, &self.schedule))
    }
}
