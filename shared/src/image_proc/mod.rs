//! Per-source image processing: cutouts, segmentation relabeling and PSF scaling.

pub mod cutout;
pub mod psf;
pub mod segmentation;

pub use cutout::{
    extract_cutout, CutoutBundle, CutoutConfig, CutoutError, CutoutGeometry, RasterSet,
    SourceGeometry,
};
pub use psf::{PsfError, ReferencePsf};
pub use segmentation::relabel_around_center;
