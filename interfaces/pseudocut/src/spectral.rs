//! Spectral bipartition of the affinity graph.

use nalgebra::{DMatrix, DVector};

use crate::error::{PseudocutError, Result};
use crate::graph::Affinity;

/// The low end of the generalized spectrum of ((D - A), D).
pub struct SpectralPair {
    /// Eigenvector at the second-smallest eigenvalue, the main cut axis.
    pub second: DVector<f64>,
    /// Eigenvector at the third-smallest eigenvalue.
    pub third: DVector<f64>,
}

/// Solve (D - A) v = lambda D v and return the eigenvectors at the second and
/// third smallest eigenvalues.
///
/// The smallest eigenvalue belongs to the trivial all-constant solution and is
/// discarded. The generalized problem is reduced to an ordinary symmetric one
/// on D^{-1/2} (D - A) D^{-1/2}, which is valid because every degree is
/// strictly positive. Eigenvector signs are whatever the solver produced;
/// disambiguation happens downstream.
pub fn second_smallest_eigenvector(affinity: &Affinity) -> Result<SpectralPair> {
    let patches = affinity.len();
    if patches < 3 {
        return Err(PseudocutError::Solver(format!(
            "graph with {patches} nodes has no nontrivial spectrum"
        )));
    }

    let inv_sqrt: DVector<f64> = affinity.degree.map(|d| 1.0 / d.sqrt());
    let lsym = DMatrix::from_fn(patches, patches, |i, j| {
        let laplacian = if i == j {
            affinity.degree[i] - affinity.adjacency[(i, j)]
        } else {
            -affinity.adjacency[(i, j)]
        };
        laplacian * inv_sqrt[i] * inv_sqrt[j]
    });

    let eig = lsym.symmetric_eigen();
    if eig.eigenvalues.iter().any(|v| !v.is_finite()) {
        return Err(PseudocutError::Solver(
            "spectrum contains non-finite eigenvalues".into(),
        ));
    }

    let mut order: Vec<usize> = (0..patches).collect();
    order.sort_by(|&a, &b| eig.eigenvalues[a].total_cmp(&eig.eigenvalues[b]));

    // Map back to the generalized problem: v = D^{-1/2} u.
    let generalized = |column: usize| -> DVector<f64> {
        let u = eig.eigenvectors.column(column);
        DVector::from_fn(patches, |i, _| u[i] * inv_sqrt[i])
    };

    Ok(SpectralPair {
        second: generalized(order[1]),
        third: generalized(order[2]),
    })
}

/// Mean-threshold bipartition of the cut axis: a patch is salient when its
/// component sits above the vector's mean.
pub fn salient_partition(eigenvector: &DVector<f64>) -> Vec<bool> {
    let mean = eigenvector.mean();
    eigenvector.iter().map(|&v| v > mean).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::affinity_matrix;
    use candle_core::{Device, Tensor};

    /// Features with a clear two-cluster structure over a 2x3 grid.
    fn clustered_features() -> Tensor {
        let data = vec![
            1.0f32, 1.0, 1.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0, 1.0, 1.0,
        ];
        Tensor::from_vec(data, (2, 6), &Device::Cpu).unwrap()
    }

    #[test]
    fn partition_separates_clusters() {
        let affinity = affinity_matrix(&clustered_features(), 0.5).unwrap();
        let pair = second_smallest_eigenvector(&affinity).unwrap();
        assert_eq!(pair.second.len(), 6);
        assert_eq!(pair.third.len(), 6);
        let partition = salient_partition(&pair.second);
        assert_eq!(partition[0], partition[1]);
        assert_eq!(partition[1], partition[2]);
        assert_eq!(partition[3], partition[4]);
        assert_eq!(partition[4], partition[5]);
        assert_ne!(partition[0], partition[3]);
    }

    #[test]
    fn partition_never_collapses_to_one_label() {
        let affinity = affinity_matrix(&clustered_features(), 0.5).unwrap();
        let pair = second_smallest_eigenvector(&affinity).unwrap();
        let partition = salient_partition(&pair.second);
        assert!(partition.iter().any(|&b| b));
        assert!(partition.iter().any(|&b| !b));
    }

    #[test]
    fn tiny_graphs_are_rejected() {
        let feats = Tensor::from_vec(vec![1.0f32, 0.0], (1, 2), &Device::Cpu).unwrap();
        let affinity = affinity_matrix(&feats, 0.5).unwrap();
        assert!(second_smallest_eigenvector(&affinity).is_err());
    }
}
