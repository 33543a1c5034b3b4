//! Robust statistics for background estimation.
//!
//! Provides median and iterative sigma-clipped statistics over arbitrary pixel
//! samples. The clipping follows the usual astronomical convention: the
//! center is the median, the spread is the population standard deviation, and
//! values further than `sigma × std` from the center are rejected until nothing
//! changes or the iteration limit is reached.

/// Parameters for iterative sigma clipping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SigmaClip {
    /// Rejection threshold in units of standard deviation
    pub sigma: f64,
    /// Maximum number of clipping passes
    pub max_iters: usize,
}

impl Default for SigmaClip {
    fn default() -> Self {
        Self {
            sigma: 3.0,
            max_iters: 5,
        }
    }
}

/// Summary statistics of the values surviving sigma clipping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClippedStats {
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    /// Number of samples that survived clipping
    pub count: usize,
}

/// Median of the non-NaN values; the mean of the middle pair for even lengths.
#[cfg(test)]
fn median(values: &[f64]) -> Option<f64> {
    let mut valid: Vec<f64> = values.iter().filter(|v| !v.is_nan()).copied().collect();
    if valid.is_empty() {
        return None;
    }
    Some(median_of_sorted(sort_values(&mut valid)))
}

fn sort_values(values: &mut [f64]) -> &[f64] {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    values
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Compute sigma-clipped mean, median and standard deviation.
///
/// Non-finite samples are ignored. Returns `None` when no finite sample is
/// available.
///
/// # Arguments
/// * `values` - Samples to summarize (typically unmasked background pixels)
/// * `clip` - Clipping threshold and iteration limit
pub fn sigma_clipped_stats<I>(values: I, clip: &SigmaClip) -> Option<ClippedStats>
where
    I: IntoIterator<Item = f64>,
{
    let mut kept: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    if kept.is_empty() {
        return None;
    }

    for _ in 0..clip.max_iters {
        let center = median_of_sorted(sort_values(&mut kept));
        let (_, std) = mean_and_std(&kept);
        let lower = center - clip.sigma * std;
        let upper = center + clip.sigma * std;

        let before = kept.len();
        kept.retain(|&v| v >= lower && v <= upper);

        if kept.len() == before || kept.is_empty() {
            break;
        }
    }

    if kept.is_empty() {
        return None;
    }

    let median = median_of_sorted(sort_values(&mut kept));
    let (mean, std) = mean_and_std(&kept);

    Some(ClippedStats {
        mean,
        median,
        std,
        count: kept.len(),
    })
}
