//! Empirical PSF scaling.
//!
//! The survey ships one empirical PSF measured at a reference seeing. A kernel
//! for any other seeing is obtained by geometric rescaling: the reference is
//! resampled onto a grid `seeing / reference_fwhm` times as large and
//! renormalized to unit sum.

use std::path::Path;

use ndarray::{Array1, Array2, ArrayView2, Axis};
use thiserror::Error;

use crate::io::fits::{read_image_f64, FitsError};

#[derive(Error, Debug)]
pub enum PsfError {
    #[error("failed to read reference PSF: {0}")]
    Fits(#[from] FitsError),
    #[error("reference PSF is empty")]
    Empty,
    #[error("invalid seeing FWHM {0}")]
    InvalidSeeing(f64),
    #[error("invalid reference FWHM {0}")]
    InvalidReferenceFwhm(f64),
    #[error("PSF kernel sums to {0}, cannot normalize")]
    DegenerateKernel(f64),
}

/// Reference PSF kernel together with the seeing it was measured at.
///
/// Loaded once per run and shared read-only by every worker.
#[derive(Debug, Clone)]
pub struct ReferencePsf {
    kernel: Array2<f64>,
    fwhm: f64,
}

impl ReferencePsf {
    pub fn new(kernel: Array2<f64>, fwhm: f64) -> Result<Self, PsfError> {
        if kernel.is_empty() {
            return Err(PsfError::Empty);
        }
        if !fwhm.is_finite() || fwhm <= 0.0 {
            return Err(PsfError::InvalidReferenceFwhm(fwhm));
        }
        Ok(Self {
            kernel: normalize(kernel)?,
            fwhm,
        })
    }

    /// Load the reference kernel from the primary HDU of a FITS file.
    pub fn load<P: AsRef<Path>>(path: P, fwhm: f64) -> Result<Self, PsfError> {
        let kernel = read_image_f64(path.as_ref(), 0)?;
        let (rows, cols) = kernel.dim();
        log::info!(
            "Loaded {rows}x{cols} reference PSF ({fwhm}\" FWHM) from {}",
            path.as_ref().display()
        );
        Self::new(kernel, fwhm)
    }

    pub fn kernel(&self) -> ArrayView2<'_, f64> {
        self.kernel.view()
    }

    pub fn fwhm(&self) -> f64 {
        self.fwhm
    }

    /// Unit-sum kernel rescaled to the given seeing FWHM.
    pub fn for_seeing(&self, seeing: f64) -> Result<Array2<f64>, PsfError> {
        if !seeing.is_finite() || seeing <= 0.0 {
            return Err(PsfError::InvalidSeeing(seeing));
        }
        let scale = seeing / self.fwhm;
        normalize(rescale(self.kernel.view(), scale))
    }
}

fn normalize(kernel: Array2<f64>) -> Result<Array2<f64>, PsfError> {
    let total = kernel.sum();
    if !total.is_finite() || total <= 0.0 {
        return Err(PsfError::DegenerateKernel(total));
    }
    Ok(kernel / total)
}

/// Resample `kernel` onto a grid `scale` times its size.
///
/// Output pixel centers are mapped back onto the input grid and interpolated
/// bilinearly with symmetric edge reflection. When shrinking, the input is
/// first smoothed with a Gaussian of sigma `(1 / scale - 1) / 2`.
pub fn rescale(kernel: ArrayView2<f64>, scale: f64) -> Array2<f64> {
    let (rows, cols) = kernel.dim();
    let out_rows = ((rows as f64 * scale).round() as usize).max(1);
    let out_cols = ((cols as f64 * scale).round() as usize).max(1);

    let source = if scale < 1.0 {
        gaussian_smooth(kernel, (1.0 / scale - 1.0) / 2.0)
    } else {
        kernel.to_owned()
    };

    // Effective per-axis factors after rounding the output size
    let row_factor = rows as f64 / out_rows as f64;
    let col_factor = cols as f64 / out_cols as f64;

    Array2::from_shape_fn((out_rows, out_cols), |(r, c)| {
        let src_r = (r as f64 + 0.5) * row_factor - 0.5;
        let src_c = (c as f64 + 0.5) * col_factor - 0.5;
        bilinear(&source, src_r, src_c)
    })
}

fn bilinear(data: &Array2<f64>, row: f64, col: f64) -> f64 {
    let (rows, cols) = data.dim();
    let r0 = row.floor();
    let c0 = col.floor();
    let fr = row - r0;
    let fc = col - c0;

    let r0 = r0 as i64;
    let c0 = c0 as i64;
    let (ra, rb) = (reflect(r0, rows), reflect(r0 + 1, rows));
    let (ca, cb) = (reflect(c0, cols), reflect(c0 + 1, cols));

    let top = data[[ra, ca]] * (1.0 - fc) + data[[ra, cb]] * fc;
    let bottom = data[[rb, ca]] * (1.0 - fc) + data[[rb, cb]] * fc;
    top * (1.0 - fr) + bottom * fr
}

/// Symmetric reflection of an index into `[0, len)`: -1 maps to 0, len to len - 1.
fn reflect(index: i64, len: usize) -> usize {
    let len = len as i64;
    if len == 1 {
        return 0;
    }
    let period = 2 * len;
    let mut i = index.rem_euclid(period);
    if i >= len {
        i = period - 1 - i;
    }
    i as usize
}

fn gaussian_kernel_1d(sigma: f64) -> Array1<f64> {
    let radius = (4.0 * sigma).ceil().max(1.0) as i64;
    let weights = Array1::from_iter((-radius..=radius).map(|i| {
        let x = i as f64;
        (-0.5 * x * x / (sigma * sigma)).exp()
    }));
    let total = weights.sum();
    weights / total
}

fn gaussian_smooth(data: ArrayView2<f64>, sigma: f64) -> Array2<f64> {
    if sigma <= 0.0 {
        return data.to_owned();
    }
    let weights = gaussian_kernel_1d(sigma);
    let radius = (weights.len() / 2) as i64;

    let along = |input: &Array2<f64>, axis: Axis| -> Array2<f64> {
        let len = input.len_of(axis);
        Array2::from_shape_fn(input.dim(), |(r, c)| {
            let pos = (if axis == Axis(0) { r } else { c }) as i64;
            weights
                .iter()
                .enumerate()
                .map(|(k, w)| {
                    let j = reflect(pos + k as i64 - radius, len);
                    let value = if axis == Axis(0) {
                        input[[j, c]]
                    } else {
                        input[[r, j]]
                    };
                    w * value
                })
                .sum()
        })
    };

    let rows_done = along(&data.to_owned(), Axis(0));
    along(&rows_done, Axis(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::fits::{write_typed_fits, FitsDataType};
    use crate::test_util::gaussian_kernel;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    fn centroid(kernel: &Array2<f64>) -> (f64, f64) {
        let total = kernel.sum();
        let mut r_sum = 0.0;
        let mut c_sum = 0.0;
        for ((r, c), &v) in kernel.indexed_iter() {
            r_sum += r as f64 * v;
            c_sum += c as f64 * v;
        }
        (r_sum / total, c_sum / total)
    }

    #[test]
    fn test_reflect_indices() {
        assert_eq!(reflect(-1, 5), 0);
        assert_eq!(reflect(-2, 5), 1);
        assert_eq!(reflect(5, 5), 4);
        assert_eq!(reflect(6, 5), 3);
        assert_eq!(reflect(2, 5), 2);
        assert_eq!(reflect(-3, 1), 0);
    }

    #[test]
    fn test_identity_scale_preserves_kernel() {
        let kernel = gaussian_kernel(11, 2.0);
        let scaled = rescale(kernel.view(), 1.0);
        assert_eq!(scaled.dim(), (11, 11));
        for (a, b) in scaled.iter().zip(kernel.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_output_size_follows_scale() {
        let psf = ReferencePsf::new(gaussian_kernel(21, 3.0), 1.0).unwrap();

        let wide = psf.for_seeing(1.5).unwrap();
        assert_eq!(wide.dim(), (32, 32));

        let narrow = psf.for_seeing(0.6).unwrap();
        assert_eq!(narrow.dim(), (13, 13));

        let tiny = psf.for_seeing(0.01).unwrap();
        assert_eq!(tiny.dim(), (1, 1));
        assert_relative_eq!(tiny[[0, 0]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rescaled_kernel_has_unit_sum_and_stays_centered() {
        let psf = ReferencePsf::new(gaussian_kernel(25, 3.0), 1.0).unwrap();
        for seeing in [0.5, 0.73, 1.0, 1.3, 2.0] {
            let kernel = psf.for_seeing(seeing).unwrap();
            assert_relative_eq!(kernel.sum(), 1.0, epsilon = 1e-12);
            assert!(kernel.iter().all(|&v| v >= 0.0));

            let (rows, cols) = kernel.dim();
            let (cr, cc) = centroid(&kernel);
            assert_relative_eq!(cr, (rows as f64 - 1.0) / 2.0, epsilon = 1e-6);
            assert_relative_eq!(cc, (cols as f64 - 1.0) / 2.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_wider_seeing_spreads_light() {
        let psf = ReferencePsf::new(gaussian_kernel(25, 3.0), 1.0).unwrap();
        let sharp = psf.for_seeing(0.7).unwrap();
        let broad = psf.for_seeing(1.4).unwrap();
        let peak = |k: &Array2<f64>| k.iter().cloned().fold(f64::MIN, f64::max);
        assert!(peak(&sharp) > peak(&broad));
    }

    #[test]
    fn test_invalid_inputs() {
        let psf = ReferencePsf::new(gaussian_kernel(9, 1.5), 1.0).unwrap();
        assert!(matches!(psf.for_seeing(0.0), Err(PsfError::InvalidSeeing(_))));
        assert!(matches!(
            psf.for_seeing(f64::NAN),
            Err(PsfError::InvalidSeeing(_))
        ));
        assert!(matches!(
            ReferencePsf::new(Array2::zeros((5, 5)), 1.0),
            Err(PsfError::DegenerateKernel(_))
        ));
        assert!(matches!(
            ReferencePsf::new(Array2::zeros((0, 0)), 1.0),
            Err(PsfError::Empty)
        ));
        assert!(matches!(
            ReferencePsf::new(gaussian_kernel(9, 1.5), -1.0),
            Err(PsfError::InvalidReferenceFwhm(_))
        ));
    }

    #[test]
    fn test_load_from_fits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("psf.fits");
        let kernel = gaussian_kernel(15, 2.0) * 40.0;
        write_typed_fits(&path, Some(&FitsDataType::Float64(kernel)), &[]).unwrap();

        let psf = ReferencePsf::load(&path, 1.0).unwrap();
        assert_eq!(psf.kernel().dim(), (15, 15));
        assert_relative_eq!(psf.kernel().sum(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(psf.fwhm(), 1.0);
    }
}
