//! Patch-similarity affinity graphs.

use candle_core::Tensor;
use nalgebra::{DMatrix, DVector};

use crate::error::Result;

/// Weight assigned to below-threshold edges. Nonzero so every node keeps a
/// positive degree and the generalized eigenproblem stays well-posed.
pub const EPS: f64 = 1e-5;

/// A thresholded patch-similarity graph and its node degrees.
pub struct Affinity {
    /// Symmetric adjacency with entries in { [`EPS`], 1 }.
    pub adjacency: DMatrix<f64>,
    /// Row sums of the adjacency.
    pub degree: DVector<f64>,
}

impl Affinity {
    /// Number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.degree.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.degree.len() == 0
    }
}

/// Build the thresholded cosine-similarity graph over patches.
///
/// `feats` is (D, P). Each patch descriptor is L2-normalized along the
/// feature dimension, pairwise similarities are taken on the feature device,
/// and entry (i, j) becomes 1 when the similarity exceeds `tau` and [`EPS`]
/// otherwise.
pub fn affinity_matrix(feats: &Tensor, tau: f32) -> Result<Affinity> {
    let normalized = normalize_columns(feats)?;
    let sim = normalized.t()?.contiguous()?.matmul(&normalized)?;
    let sim = sim.to_vec2::<f32>()?;
    let patches = sim.len();
    let adjacency = DMatrix::from_fn(patches, patches, |i, j| {
        if sim[i][j] > tau {
            1.0
        } else {
            EPS
        }
    });
    let degree = DVector::from_iterator(patches, adjacency.row_iter().map(|row| row.sum()));
    Ok(Affinity { adjacency, degree })
}

/// L2-normalize each column of a (D, P) tensor. Zeroed-out (masked) patches
/// stay zero rather than dividing by zero.
fn normalize_columns(feats: &Tensor) -> candle_core::Result<Tensor> {
    let norm = feats.sqr()?.sum_keepdim(0)?.sqrt()?;
    let norm = (norm + 1e-12)?;
    feats.broadcast_div(&norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn toy_features() -> Tensor {
        // Four patches in two tight clusters.
        let data = vec![
            1.0f32, 0.9, 0.0, 0.1, //
            0.0, 0.1, 1.0, 0.9,
        ];
        Tensor::from_vec(data, (2, 4), &Device::Cpu).unwrap()
    }

    #[test]
    fn affinity_is_symmetric_with_eps_floor() {
        let affinity = affinity_matrix(&toy_features(), 0.5).unwrap();
        assert_eq!(affinity.len(), 4);
        for i in 0..4 {
            for j in 0..4 {
                let v = affinity.adjacency[(i, j)];
                assert_eq!(v, affinity.adjacency[(j, i)]);
                assert!(v == 1.0 || v == EPS, "unexpected entry {v}");
            }
        }
    }

    #[test]
    fn degrees_are_strictly_positive_for_any_tau() {
        for tau in [0.0, 0.2, 0.5, 0.99] {
            let affinity = affinity_matrix(&toy_features(), tau).unwrap();
            for d in affinity.degree.iter() {
                assert!(*d >= EPS * affinity.len() as f64);
            }
        }
    }

    #[test]
    fn masked_patches_do_not_blow_up() {
        let data = vec![0.0f32; 8];
        let feats = Tensor::from_vec(data, (2, 4), &Device::Cpu).unwrap();
        let affinity = affinity_matrix(&feats, 0.2).unwrap();
        for d in affinity.degree.iter() {
            assert!(d.is_finite());
        }
    }
}
