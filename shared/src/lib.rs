//! Image-processing primitives shared by the tile morphology pipeline.

pub mod algo;
pub mod image_proc;
pub mod io;
pub mod test_util;
