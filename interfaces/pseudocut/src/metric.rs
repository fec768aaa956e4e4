//! Mask overlap measures.

use crate::GridMask;

/// Intersection over union of two boolean masks. Zero when both are empty.
pub fn overlap_ratio(a: &GridMask, b: &GridMask) -> f32 {
    iou(
        a.data().iter().copied(),
        b.data().iter().copied(),
    )
}

/// Intersection over union of two soft maps, thresholded at 0.5.
pub fn overlap_ratio_maps(a: &[f32], b: &[f32]) -> f32 {
    iou(a.iter().map(|&v| v > 0.5), b.iter().map(|&v| v > 0.5))
}

fn iou(a: impl Iterator<Item = bool>, b: impl Iterator<Item = bool>) -> f32 {
    let mut intersection = 0usize;
    let mut union = 0usize;
    for (x, y) in a.zip(b) {
        if x && y {
            intersection += 1;
        }
        if x || y {
            union += 1;
        }
    }
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_masks_have_unit_overlap() {
        let mask = GridMask::from_data(2, 2, vec![true, false, true, false]);
        assert_eq!(overlap_ratio(&mask, &mask), 1.0);
    }

    #[test]
    fn disjoint_masks_have_zero_overlap() {
        let a = GridMask::from_data(2, 1, vec![true, false]);
        let b = GridMask::from_data(2, 1, vec![false, true]);
        assert_eq!(overlap_ratio(&a, &b), 0.0);
    }

    #[test]
    fn empty_masks_do_not_divide_by_zero() {
        let a = GridMask::new(3, 3);
        assert_eq!(overlap_ratio(&a, &a), 0.0);
    }

    #[test]
    fn soft_maps_threshold_at_half() {
        let a = [0.9f32, 0.4, 0.8, 0.1];
        let b = [0.7f32, 0.6, 0.2, 0.0];
        // fg(a) = {0, 2}, fg(b) = {0, 1}: intersection 1, union 3.
        assert!((overlap_ratio_maps(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
    }
}
