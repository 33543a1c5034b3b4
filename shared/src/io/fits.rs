//! FITS file I/O for survey rasters and catalogs
//!
//! Reads single image HDUs into `ndarray` arrays, reads numeric columns of
//! binary tables, and writes multi-extension files with named image HDUs.
//!
//! Arrays use FITS storage order directly: row `r` of an array is `NAXIS2`
//! index `r`, column `c` is `NAXIS1` index `c`. No vertical flip is applied,
//! so catalog pixel coordinates index arrays the same way they index the file.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use fitsio::hdu::{FitsHdu, HduInfo};
use fitsio::images::{ImageDescription, ImageType, ReadImage};
use fitsio::FitsFile;
use ndarray::Array2;
use thiserror::Error;

/// Errors that can occur during FITS file operations
#[derive(Error, Debug)]
pub enum FitsError {
    #[error("FITS I/O error: {0}")]
    FitsIo(#[from] fitsio::errors::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HDU {index} is not a 2D image (shape {shape:?})")]
    NotAnImage { index: usize, shape: Vec<usize> },
    #[error("HDU {0} is not a table")]
    NotATable(usize),
    #[error("column {column} has {found} rows, expected {expected}")]
    ColumnLength {
        column: String,
        found: usize,
        expected: usize,
    },
    #[error("Invalid data type in HDU: {0}")]
    InvalidDataType(String),
}

/// Typed 2D array data for writing an image HDU
#[derive(Debug, Clone)]
pub enum FitsDataType {
    /// 8-bit unsigned integer data
    UInt8(Array2<u8>),
    /// 32-bit signed integer data
    Int32(Array2<i32>),
    /// 32-bit floating point data
    Float32(Array2<f32>),
    /// 64-bit floating point data (double precision)
    Float64(Array2<f64>),
}

impl FitsDataType {
    fn dimensions(&self) -> (usize, usize) {
        match self {
            FitsDataType::UInt8(arr) => arr.dim(),
            FitsDataType::Int32(arr) => arr.dim(),
            FitsDataType::Float32(arr) => arr.dim(),
            FitsDataType::Float64(arr) => arr.dim(),
        }
    }

    fn image_type(&self) -> ImageType {
        match self {
            FitsDataType::UInt8(_) => ImageType::UnsignedByte,
            FitsDataType::Int32(_) => ImageType::Long,
            FitsDataType::Float32(_) => ImageType::Float,
            FitsDataType::Float64(_) => ImageType::Double,
        }
    }

    fn write_data(&self, fptr: &mut FitsFile, hdu: &FitsHdu) -> Result<(), FitsError> {
        match self {
            FitsDataType::UInt8(arr) => {
                let flat: Vec<u8> = arr.iter().copied().collect();
                hdu.write_image(fptr, &flat)?;
            }
            FitsDataType::Int32(arr) => {
                let flat: Vec<i32> = arr.iter().copied().collect();
                hdu.write_image(fptr, &flat)?;
            }
            FitsDataType::Float32(arr) => {
                let flat: Vec<f32> = arr.iter().copied().collect();
                hdu.write_image(fptr, &flat)?;
            }
            FitsDataType::Float64(arr) => {
                let flat: Vec<f64> = arr.iter().copied().collect();
                hdu.write_image(fptr, &flat)?;
            }
        }
        Ok(())
    }
}

fn image_shape(hdu: &FitsHdu, index: usize) -> Result<(usize, usize), FitsError> {
    match &hdu.info {
        // fitsio reports image shapes in row-major order: [NAXIS2, NAXIS1]
        HduInfo::ImageInfo { shape, .. } if shape.len() == 2 => Ok((shape[0], shape[1])),
        HduInfo::ImageInfo { shape, .. } => Err(FitsError::NotAnImage {
            index,
            shape: shape.clone(),
        }),
        _ => Err(FitsError::NotAnImage {
            index,
            shape: Vec::new(),
        }),
    }
}

fn read_image<T, P>(path: P, index: usize) -> Result<Array2<T>, FitsError>
where
    Vec<T>: ReadImage,
    P: AsRef<Path>,
{
    let mut fptr = FitsFile::open(path.as_ref())?;
    let hdu = fptr.hdu(index)?;
    let (rows, cols) = image_shape(&hdu, index)?;
    let data: Vec<T> = hdu.read_image(&mut fptr)?;

    Array2::from_shape_vec((rows, cols), data).map_err(|e| {
        FitsError::InvalidDataType(format!("cannot reshape HDU {index} to {rows}x{cols}: {e}"))
    })
}

/// Read image HDU `index` as 32-bit floats (science and weight rasters).
pub fn read_image_f32<P: AsRef<Path>>(path: P, index: usize) -> Result<Array2<f32>, FitsError> {
    read_image(path, index)
}

/// Read image HDU `index` as 32-bit integers (segmentation maps).
pub fn read_image_i32<P: AsRef<Path>>(path: P, index: usize) -> Result<Array2<i32>, FitsError> {
    read_image(path, index)
}

/// Read image HDU `index` as doubles.
pub fn read_image_f64<P: AsRef<Path>>(path: P, index: usize) -> Result<Array2<f64>, FitsError> {
    read_image(path, index)
}

/// Read named numeric columns from the binary table in HDU `index`.
///
/// Columns are returned in the order requested. All columns must have the
/// same number of rows.
pub fn read_table_columns<P: AsRef<Path>>(
    path: P,
    index: usize,
    columns: &[&str],
) -> Result<Vec<Vec<f64>>, FitsError> {
    let mut fptr = FitsFile::open(path.as_ref())?;
    let hdu = fptr.hdu(index)?;
    let num_rows = match &hdu.info {
        HduInfo::TableInfo { num_rows, .. } => *num_rows,
        _ => return Err(FitsError::NotATable(index)),
    };

    let mut out = Vec::with_capacity(columns.len());
    for &name in columns {
        let values: Vec<f64> = hdu.read_col(&mut fptr, name)?;
        if values.len() != num_rows {
            return Err(FitsError::ColumnLength {
                column: name.to_string(),
                found: values.len(),
                expected: num_rows,
            });
        }
        out.push(values);
    }
    Ok(out)
}

/// Check for the `SIMPLE` keyword that opens every FITS file.
pub fn is_fits_file<P: AsRef<Path>>(path: P) -> Result<bool, FitsError> {
    let mut file = File::open(path)?;
    let mut head = [0u8; 6];
    match file.read_exact(&mut head) {
        Ok(()) => Ok(&head == b"SIMPLE"),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Write a FITS file with optional primary image data and named image extensions
///
/// # Arguments
/// * `path` - Output path, overwritten if it exists
/// * `primary` - Data for the primary HDU, or `None` for an empty primary
/// * `extensions` - `(EXTNAME, data)` pairs written as HDUs 1.. in order
pub fn write_typed_fits<P: AsRef<Path>>(
    path: P,
    primary: Option<&FitsDataType>,
    extensions: &[(&str, FitsDataType)],
) -> Result<(), FitsError> {
    let mut fptr = match primary {
        Some(data) => {
            let (height, width) = data.dimensions();
            let dimensions = [height, width];
            let description = ImageDescription {
                data_type: data.image_type(),
                dimensions: &dimensions,
            };
            let mut fptr = FitsFile::create(path.as_ref())
                .with_custom_primary(&description)
                .overwrite()
                .open()?;
            let hdu = fptr.primary_hdu()?;
            data.write_data(&mut fptr, &hdu)?;
            fptr
        }
        None => FitsFile::create(path.as_ref()).overwrite().open()?,
    };

    for (name, data) in extensions {
        let (height, width) = data.dimensions();
        let dimensions = [height, width];
        let description = ImageDescription {
            data_type: data.image_type(),
            dimensions: &dimensions,
        };
        let hdu = fptr.create_image(name.to_string(), &description)?;
        data.write_data(&mut fptr, &hdu)?;
    }

    Ok(())
}
