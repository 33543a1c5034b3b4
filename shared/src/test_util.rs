//! Synthetic survey data for tests.
//!
//! Builds small co-registered image, weight and segmentation rasters with
//! Gaussian sources on a noisy sky, seeded so every run sees the same pixels.

use ndarray::Array2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal, NormalError};

/// Unit-sum circular Gaussian kernel of side `size` centered on the middle pixel.
pub fn gaussian_kernel(size: usize, sigma: f64) -> Array2<f64> {
    let center = (size as f64 - 1.0) / 2.0;
    let kernel = Array2::from_shape_fn((size, size), |(r, c)| {
        let dr = r as f64 - center;
        let dc = c as f64 - center;
        (-(dr * dr + dc * dc) / (2.0 * sigma * sigma)).exp()
    });
    let total = kernel.sum();
    kernel / total
}

/// One Gaussian source painted into a synthetic field.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticSource {
    /// Column of the peak
    pub x: f64,
    /// Row of the peak
    pub y: f64,
    pub amplitude: f64,
    /// Gaussian sigma in pixels
    pub sigma: f64,
    /// Segmentation label written where the source rises above the detection threshold
    pub label: i32,
}

/// Co-registered rasters of a synthetic tile.
#[derive(Debug, Clone)]
pub struct SyntheticField {
    pub image: Array2<f32>,
    pub weight: Array2<f32>,
    pub segmentation: Array2<i32>,
}

/// Generate a synthetic tile.
///
/// Pixels are `sky + N(0, noise_std) + sum of sources`. The weight map is the
/// inverse variance of the sky noise. A pixel is labelled with the brightest
/// source whose noiseless profile exceeds `3 * noise_std` there. A negative or
/// non-finite `noise_std` is rejected.
pub fn synthetic_galaxy_field(
    shape: (usize, usize),
    sky: f64,
    noise_std: f64,
    sources: &[SyntheticSource],
    seed: u64,
) -> Result<SyntheticField, NormalError> {
    if !noise_std.is_finite() || noise_std < 0.0 {
        return Err(NormalError::BadVariance);
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let noise = Normal::new(0.0, noise_std)?;
    let threshold = 3.0 * noise_std;

    let mut image = Array2::<f32>::zeros(shape);
    let mut segmentation = Array2::<i32>::zeros(shape);

    for ((r, c), pixel) in image.indexed_iter_mut() {
        let mut value = sky + noise.sample(&mut rng);
        let mut best = 0.0;
        for source in sources {
            let dx = c as f64 - source.x;
            let dy = r as f64 - source.y;
            let profile =
                source.amplitude * (-(dx * dx + dy * dy) / (2.0 * source.sigma * source.sigma)).exp();
            value += profile;
            if profile > threshold && profile > best {
                best = profile;
                segmentation[[r, c]] = source.label;
            }
        }
        *pixel = value as f32;
    }

    let inverse_variance = if noise_std > 0.0 {
        (1.0 / (noise_std * noise_std)) as f32
    } else {
        1.0
    };
    let weight = Array2::from_elem(shape, inverse_variance);

    Ok(SyntheticField {
        image,
        weight,
        segmentation,
    })
}
