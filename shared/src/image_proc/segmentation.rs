//! Segmentation map relabeling for single-source measurement.
//!
//! Source-extraction segmentation maps carry one integer label per detected
//! source. Morphology measurement wants a ternary map instead: the target
//! source, everything else that was detected, and sky.

use ndarray::{Array2, ArrayView2};

/// Sky pixel (no detected source)
pub const BACKGROUND: u8 = 0;
/// Pixel belonging to the source being measured
pub const TARGET: u8 = 1;
/// Pixel belonging to any other detected source
pub const CONTAMINANT: u8 = 2;

/// Relabel a segmentation patch around the label found at its geometric center.
///
/// The label at `(rows / 2, cols / 2)` is taken to be the target. Every pixel
/// carrying that label becomes [`TARGET`], every other nonzero pixel becomes
/// [`CONTAMINANT`] and zero pixels stay [`BACKGROUND`]. When the center pixel
/// is sky, no pixel can match it and all detections become contaminants.
pub fn relabel_around_center(patch: ArrayView2<i32>) -> Array2<u8> {
    let (rows, cols) = patch.dim();
    if rows == 0 || cols == 0 {
        return Array2::zeros((rows, cols));
    }

    let target = patch[[rows / 2, cols / 2]];

    patch.mapv(|label| match label {
        0 => BACKGROUND,
        l if l == target => TARGET,
        _ => CONTAMINANT,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_center_label_becomes_target() {
        let patch: Array2<i32> = array![
            [0, 0, 7, 7, 0],
            [0, 3, 3, 7, 0],
            [0, 3, 3, 3, 0],
            [9, 9, 3, 0, 0],
            [9, 9, 0, 0, 0],
        ];

        let relabeled = relabel_around_center(patch.view());

        let expected: Array2<u8> = array![
            [0, 0, 2, 2, 0],
            [0, 1, 1, 2, 0],
            [0, 1, 1, 1, 0],
            [2, 2, 1, 0, 0],
            [2, 2, 0, 0, 0],
        ];
        assert_eq!(relabeled, expected);
    }

    #[test]
    fn test_all_zero_patch_stays_zero() {
        let patch = Array2::<i32>::zeros((6, 4));
        let relabeled = relabel_around_center(patch.view());
        assert!(relabeled.iter().all(|&v| v == BACKGROUND));
    }

    #[test]
    fn test_sky_center_marks_everything_as_contaminant() {
        let patch: Array2<i32> = array![[5, 0, 0], [0, 0, 0], [0, 0, 6]];
        let relabeled = relabel_around_center(patch.view());
        let expected: Array2<u8> = array![[2, 0, 0], [0, 0, 0], [0, 0, 2]];
        assert_eq!(relabeled, expected);
    }

    #[test]
    fn test_even_sized_patch_uses_lower_right_center() {
        // 4x4 patch: center index is (2, 2)
        let mut patch = Array2::<i32>::from_elem((4, 4), 4);
        patch[[2, 2]] = 8;
        patch[[0, 0]] = 8;

        let relabeled = relabel_around_center(patch.view());

        assert_eq!(relabeled[[2, 2]], TARGET);
        assert_eq!(relabeled[[0, 0]], TARGET);
        assert_eq!(relabeled[[1, 1]], CONTAMINANT);
        assert_eq!(relabeled.iter().filter(|&&v| v == TARGET).count(), 2);
    }

    #[test]
    fn test_input_not_modified() {
        let patch: Array2<i32> = array![[1, 2], [2, 2]];
        let before = patch.clone();
        let _ = relabel_around_center(patch.view());
        assert_eq!(patch, before);
    }
}
