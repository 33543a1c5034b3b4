//! Per-source cutout extraction from co-registered survey rasters.
//!
//! A cutout is a square box around a catalog position whose size scales with
//! the source's flux radius and ellipticity. The same box is sliced out of the
//! science image, the weight map and the segmentation map; the box is clipped
//! independently on each axis so sources near a tile edge yield a smaller,
//! off-center patch instead of an error.
//!
//! The extracted bundle carries everything a morphology measurement needs:
//! background-subtracted pixels, an error map, a ternary segmentation map, a
//! bad-pixel mask and a PSF kernel matched to the source's seeing.

use std::ops::Range;

use ndarray::{s, Array2, ArrayView2, Zip};
use thiserror::Error;

use crate::algo::stats::{sigma_clipped_stats, ClippedStats, SigmaClip};
use crate::image_proc::psf::{PsfError, ReferencePsf};
use crate::image_proc::segmentation::{relabel_around_center, BACKGROUND};

/// Axis ratios below this value are treated as this value when sizing boxes
pub const MIN_SIZING_AXIS_RATIO: f64 = 0.2;

#[derive(Error, Debug)]
pub enum CutoutError {
    #[error("invalid source geometry: {0}")]
    InvalidSource(String),
    #[error("cutout box around ({row}, {col}) lies outside the {height}x{width} raster")]
    OutsideRaster {
        row: i64,
        col: i64,
        height: usize,
        width: usize,
    },
    #[error("raster shapes differ: image {image:?}, weight {weight:?}, segmentation {segmentation:?}")]
    ShapeMismatch {
        image: (usize, usize),
        weight: (usize, usize),
        segmentation: (usize, usize),
    },
    #[error("no unmasked background pixels in cutout")]
    NoBackground,
    #[error("PSF synthesis failed: {0}")]
    Psf(#[from] PsfError),
}

/// Position and shape of one catalog source in pixel units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceGeometry {
    /// Column coordinate (catalog `X_IMAGE`)
    pub x: f64,
    /// Row coordinate (catalog `Y_IMAGE`)
    pub y: f64,
    pub flux_radius: f64,
    /// Minor over major axis
    pub axis_ratio: f64,
    /// Seeing FWHM at the source, in arcseconds
    pub seeing: f64,
}

/// Sizing and background parameters shared by all cutouts of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CutoutConfig {
    /// Lower bound on the half-size of the box, in pixels
    pub min_size: usize,
    /// Multiple of the (ellipticity-corrected) flux radius used as half-size
    pub radius_factor: f64,
    pub clip: SigmaClip,
}

impl Default for CutoutConfig {
    fn default() -> Self {
        Self {
            min_size: 20,
            radius_factor: 4.0,
            clip: SigmaClip::default(),
        }
    }
}

/// Pixel box of a cutout after clipping to the raster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CutoutGeometry {
    /// Rounded source row (may lie outside `rows` only if the source is off-raster)
    pub center_row: i64,
    pub center_col: i64,
    pub half_size: usize,
    pub rows: Range<usize>,
    pub cols: Range<usize>,
}

impl CutoutGeometry {
    /// Compute the clipped cutout box for a source inside a `(height, width)` raster.
    ///
    /// The center is the source position rounded to the nearest pixel and the
    /// half-size is `max(min_size, round(flux_radius * radius_factor / max(q, 0.2)))`.
    /// The box `[center - half, center + half)` is clipped to the raster per axis.
    pub fn compute(
        source: &SourceGeometry,
        config: &CutoutConfig,
        shape: (usize, usize),
    ) -> Result<Self, CutoutError> {
        let (height, width) = shape;

        for (name, value) in [
            ("x", source.x),
            ("y", source.y),
            ("flux_radius", source.flux_radius),
            ("axis_ratio", source.axis_ratio),
        ] {
            if !value.is_finite() {
                return Err(CutoutError::InvalidSource(format!(
                    "{name} is not finite ({value})"
                )));
            }
        }
        if source.flux_radius < 0.0 {
            return Err(CutoutError::InvalidSource(format!(
                "negative flux radius {}",
                source.flux_radius
            )));
        }

        let center_col = (source.x + 0.5).floor() as i64;
        let center_row = (source.y + 0.5).floor() as i64;

        let q = source.axis_ratio.max(MIN_SIZING_AXIS_RATIO);
        let scaled = (source.flux_radius * config.radius_factor / q).round() as usize;
        let half_size = scaled.max(config.min_size).max(1);

        let rows = clip_axis(center_row, half_size, height);
        let cols = clip_axis(center_col, half_size, width);

        match (rows, cols) {
            (Some(rows), Some(cols)) => Ok(Self {
                center_row,
                center_col,
                half_size,
                rows,
                cols,
            }),
            _ => Err(CutoutError::OutsideRaster {
                row: center_row,
                col: center_col,
                height,
                width,
            }),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.cols.len())
    }
}

fn clip_axis(center: i64, half: usize, len: usize) -> Option<Range<usize>> {
    let half = half as i64;
    let lo = (center - half).max(0);
    let hi = (center + half).min(len as i64);
    if lo >= hi {
        None
    } else {
        Some(lo as usize..hi as usize)
    }
}

/// Read-only views of the three co-registered rasters of a tile.
#[derive(Debug, Clone, Copy)]
pub struct RasterSet<'a> {
    pub image: ArrayView2<'a, f32>,
    pub weight: ArrayView2<'a, f32>,
    pub segmentation: ArrayView2<'a, i32>,
}

impl<'a> RasterSet<'a> {
    /// Bundle three raster views, rejecting mismatched shapes.
    pub fn new(
        image: ArrayView2<'a, f32>,
        weight: ArrayView2<'a, f32>,
        segmentation: ArrayView2<'a, i32>,
    ) -> Result<Self, CutoutError> {
        if image.dim() != weight.dim() || image.dim() != segmentation.dim() {
            return Err(CutoutError::ShapeMismatch {
                image: image.dim(),
                weight: weight.dim(),
                segmentation: segmentation.dim(),
            });
        }
        Ok(Self {
            image,
            weight,
            segmentation,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        self.image.dim()
    }
}

/// Everything the morphology measurement needs for one source.
#[derive(Debug, Clone)]
pub struct CutoutBundle {
    /// Image patch with the clipped background median subtracted
    pub image: Array2<f64>,
    /// Weight patch, passed on as the error map
    pub error: Array2<f64>,
    /// 0 background, 1 target, 2 contaminant
    pub segmap: Array2<u8>,
    /// True where the weight is zero
    pub mask: Array2<bool>,
    /// Unit-sum PSF kernel matched to the source seeing
    pub psf: Array2<f64>,
    pub background: ClippedStats,
    pub geometry: CutoutGeometry,
}

/// Extract a cutout bundle for one source.
///
/// The input rasters are only read; every array in the bundle is a fresh copy.
pub fn extract_cutout(
    source: &SourceGeometry,
    rasters: &RasterSet<'_>,
    psf: &ReferencePsf,
    config: &CutoutConfig,
) -> Result<CutoutBundle, CutoutError> {
    let geometry = CutoutGeometry::compute(source, config, rasters.shape())?;
    let (rows, cols) = (geometry.rows.clone(), geometry.cols.clone());

    let image_patch = rasters.image.slice(s![rows.clone(), cols.clone()]);
    let weight_patch = rasters.weight.slice(s![rows.clone(), cols.clone()]);
    let segmap = relabel_around_center(rasters.segmentation.slice(s![rows, cols]));

    let mask = weight_patch.mapv(|w| w == 0.0);

    let mut background_pixels = Vec::with_capacity(image_patch.len());
    Zip::from(&image_patch)
        .and(&mask)
        .and(&segmap)
        .for_each(|&value, &masked, &label| {
            if !masked && label == BACKGROUND {
                background_pixels.push(value as f64);
            }
        });

    let background =
        sigma_clipped_stats(background_pixels, &config.clip).ok_or(CutoutError::NoBackground)?;

    let image = image_patch.mapv(|v| v as f64 - background.median);
    let error = weight_patch.mapv(|v| v as f64);
    let psf = psf.for_seeing(source.seeing)?;

    Ok(CutoutBundle {
        image,
        error,
        segmap,
        mask,
        psf,
        background,
        geometry,
    })
}
