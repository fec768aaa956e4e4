//! Foreground/background disambiguation of the raw bipartition.
//!
//! The cut produced by the eigensolver is label-symmetric: swapping the two
//! sides is an equally valid partition, and the solver's sign choice is
//! arbitrary. The heuristics here pick the assignment that means "object".

use nalgebra::DVector;

/// A sign-resolved bipartition with the seed patch anchoring extraction.
pub struct Orientation {
    /// Foreground labels over the patch grid, row-major.
    pub bipartition: Vec<bool>,
    /// The cut axis, negated if the partition was flipped.
    pub eigenvector: DVector<f64>,
    /// Index of the patch with the strongest (positive) signal.
    pub seed: usize,
}

/// Decide whether the raw cut must be flipped so the foreground label lands
/// on the salient object.
///
/// A partition claiming three or more of the grid corners as foreground is
/// taken to be inverted, since objects rarely touch that many image corners
/// at once. Otherwise the partition is inverted when the largest-magnitude
/// patch of the cut axis does not carry the foreground label. The decision is
/// deterministic, and a second application to the resolved output is a no-op.
pub fn resolve(
    bipartition: Vec<bool>,
    eigenvector: DVector<f64>,
    dims: (usize, usize),
) -> Orientation {
    let (height, width) = dims;
    let corners = [
        0,
        width - 1,
        (height - 1) * width,
        height * width - 1,
    ];
    let foreground_corners = corners.iter().filter(|&&c| bipartition[c]).count();

    let reverse = if foreground_corners >= 3 {
        true
    } else {
        let peak = argmax(eigenvector.iter().map(|v| v.abs()));
        !bipartition[peak]
    };

    let (bipartition, eigenvector) = if reverse {
        (bipartition.iter().map(|&b| !b).collect(), -eigenvector)
    } else {
        (bipartition, eigenvector)
    };
    let seed = argmax(eigenvector.iter().copied());

    Orientation {
        bipartition,
        eigenvector,
        seed,
    }
}

/// Index of the first maximal element.
fn argmax(values: impl Iterator<Item = f64>) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (i, v) in values.enumerate() {
        if v > best_value {
            best = i;
            best_value = v;
        }
    }
    best
}
