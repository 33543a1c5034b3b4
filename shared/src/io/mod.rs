pub mod fits;

pub use fits::{FitsDataType, FitsError};
