//! Iterative multi-object discovery over progressively masked features.

use candle_core::{DType, Tensor};

use crate::error::Result;
use crate::{graph, metric, orientation, region, spectral, GridMask};

/// Foreground ratio at or below which a later round is considered noise.
pub const DEGENERATE_RATIO: f32 = 0.01;
/// Overlap with the previous round above which a mask is a duplicate.
pub const DUPLICATE_IOU: f32 = 0.5;

/// Options for [`discover_objects`].
#[derive(Debug, Clone, Copy)]
pub struct DiscoverOptions {
    /// Similarity threshold for affinity-graph construction.
    pub tau: f32,
    /// Number of extraction rounds (maximum objects per image).
    pub n_masks: usize,
}

impl Default for DiscoverOptions {
    fn default() -> Self {
        Self {
            tau: 0.2,
            n_masks: 3,
        }
    }
}

/// Per-round pixel maps discovered for one image, in discovery order.
pub struct Discovery {
    /// Working-resolution object maps in {0, 1}, one per round. Rejected
    /// rounds are all zero; later rounds never claim pixels already owned by
    /// an earlier one.
    pub masks: Vec<Vec<f32>>,
    /// Cut-axis maps upsampled to working resolution, for diagnostics.
    pub eigenvector_maps: Vec<Vec<f32>>,
    /// Working resolution the maps are sampled at, as (width, height).
    pub size: (usize, usize),
}

/// Run `n_masks` rounds of spectral partitioning, masking out each discovered
/// object's patches before rebuilding the graph for the next round.
///
/// `feats` is the (D, P) patch-feature tensor, `dims` the patch grid as
/// (rows, cols), `image_size` the working image as (height, width). The
/// painting mask accumulates accepted regions across rounds and only ever
/// grows; each round multiplies the original features by its complement, so
/// no round observes a mutated history.
pub fn discover_objects(
    feats: &Tensor,
    dims: (usize, usize),
    image_size: (usize, usize),
    opts: &DiscoverOptions,
) -> Result<Discovery> {
    let device = feats.device();
    let (feat_h, feat_w) = dims;
    let patches = feat_h * feat_w;
    let (height, width) = image_size;

    let mut masks = Vec::with_capacity(opts.n_masks);
    let mut eigenvector_maps = Vec::with_capacity(opts.n_masks);
    let mut claimed = vec![0f32; width * height];

    let mut feats_round = feats.clone();
    let mut painting = Tensor::zeros((feat_h, feat_w), DType::F32, device)?;
    let mut previous: Option<GridMask> = None;

    for round in 0..opts.n_masks {
        if let Some(prev) = &previous {
            painting = paint(&painting, &mask_to_tensor(prev, device)?)?;
            feats_round = mask_features(feats, &painting)?;
        }

        let affinity = graph::affinity_matrix(&feats_round, opts.tau)?;
        let pair = spectral::second_smallest_eigenvector(&affinity)?;
        let bipartition = spectral::salient_partition(&pair.second);
        let oriented = orientation::resolve(bipartition, pair.second, dims);

        let grid = GridMask::from_data(feat_w, feat_h, oriented.bipartition);
        let patch_pixels = (height / feat_h, width / feat_w);
        let detected = region::detect_box(
            &grid,
            oriented.seed,
            patch_pixels,
            (width as u32, height as u32),
        );
        let mut pseudo_mask = detected.component;

        if let Some(prev) = previous.as_ref().filter(|_| round >= 1) {
            if is_degenerate(prev, &pseudo_mask, patches) {
                pseudo_mask = GridMask::new(feat_w, feat_h);
            }
        }

        // Upsample to working resolution and strip pixels claimed earlier;
        // round order is discovery priority.
        let mut exported =
            upsample_nearest(&mask_to_tensor(&pseudo_mask, device)?, height, width)?;
        for (e, c) in exported.iter_mut().zip(&claimed) {
            *e = (*e - c).max(0.0);
        }
        for (c, e) in claimed.iter_mut().zip(&exported) {
            *c += e;
        }

        let axis: Vec<f32> = oriented.eigenvector.iter().map(|&v| v as f32).collect();
        let axis = Tensor::from_vec(axis, (feat_h, feat_w), device)?;
        eigenvector_maps.push(upsample_nearest(&axis, height, width)?);

        masks.push(exported);
        previous = Some(pseudo_mask);
    }

    Ok(Discovery {
        masks,
        eigenvector_maps,
        size: (width, height),
    })
}

/// Whether a candidate mask repeats the previous round's object or is too
/// small to be one.
fn is_degenerate(previous: &GridMask, candidate: &GridMask, patches: usize) -> bool {
    let ratio = candidate.count_ones() as f32 / patches as f32;
    metric::overlap_ratio(previous, candidate) > DUPLICATE_IOU || ratio <= DEGENERATE_RATIO
}

/// Add a round's mask into the painting, saturating at 1.
pub(crate) fn paint(painting: &Tensor, mask: &Tensor) -> Result<Tensor> {
    Ok((painting + mask)?.clamp(0f32, 1f32)?)
}

/// Zero the feature columns of painted patches.
fn mask_features(feats: &Tensor, painting: &Tensor) -> Result<Tensor> {
    let (h, w) = painting.dims2()?;
    let keep = painting.affine(-1.0, 1.0)?.reshape((1, h * w))?;
    Ok(feats.broadcast_mul(&keep)?)
}

fn mask_to_tensor(mask: &GridMask, device: &candle_core::Device) -> Result<Tensor> {
    Ok(Tensor::from_vec(
        mask.to_f32(),
        (mask.height(), mask.width()),
        device,
    )?)
}

/// Nearest-neighbor upsample of a (h, w) grid to the target resolution,
/// flattened row-major.
fn upsample_nearest(grid: &Tensor, target_h: usize, target_w: usize) -> Result<Vec<f32>> {
    let up = grid
        .unsqueeze(0)?
        .unsqueeze(0)?
        .upsample_nearest2d(target_h, target_w)?;
    Ok(up.flatten_all()?.to_vec1::<f32>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn tensor_sum(t: &Tensor) -> f32 {
        t.sum_all().unwrap().to_scalar::<f32>().unwrap()
    }

    #[test]
    fn painting_is_monotonically_non_decreasing() {
        let device = Device::Cpu;
        let mut painting = Tensor::zeros((2, 2), DType::F32, &device).unwrap();
        let rounds = [
            GridMask::from_data(2, 2, vec![true, false, false, false]),
            GridMask::from_data(2, 2, vec![true, true, false, false]),
            GridMask::from_data(2, 2, vec![false, false, false, false]),
        ];
        let mut last = 0.0;
        for mask in &rounds {
            let mask = mask_to_tensor(mask, &device).unwrap();
            painting = paint(&painting, &mask).unwrap();
            let covered = tensor_sum(&painting);
            assert!(covered >= last);
            last = covered;
            let values = painting.flatten_all().unwrap().to_vec1::<f32>().unwrap();
            assert!(values.iter().all(|&v| v == 0.0 || v == 1.0));
        }
    }

    #[test]
    fn masked_features_zero_out_painted_patches() {
        let device = Device::Cpu;
        let feats = Tensor::from_vec(vec![1.0f32; 8], (2, 4), &device).unwrap();
        let painting = Tensor::from_vec(vec![1.0f32, 0.0, 0.0, 1.0], (2, 2), &device).unwrap();
        let masked = mask_features(&feats, &painting).unwrap();
        let values = masked.to_vec2::<f32>().unwrap();
        for row in values {
            assert_eq!(row, vec![0.0, 1.0, 1.0, 0.0]);
        }
    }

    #[test]
    fn duplicate_round_is_rejected_to_zero() {
        // Features with one tight cluster: every round finds the same patch
        // group, so the second round must reject it as a duplicate.
        let device = Device::Cpu;
        let data = vec![
            1.0f32, 1.0, 0.0, 0.0, 0.0, 0.0, 0.1, 0.1, //
            0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.9, 0.9,
        ];
        let feats = Tensor::from_vec(data, (2, 8), &device).unwrap();
        let opts = DiscoverOptions {
            tau: 0.5,
            n_masks: 2,
        };
        let discovery = discover_objects(&feats, (2, 4), (4, 8), &opts).unwrap();
        assert_eq!(discovery.masks.len(), 2);
        // Round order is priority order: whatever round 1 found, it may not
        // overlap round 0.
        let first = &discovery.masks[0];
        let second = &discovery.masks[1];
        assert!(first
            .iter()
            .zip(second)
            .all(|(a, b)| !(*a > 0.5 && *b > 0.5)));
    }

    #[test]
    fn identical_masks_are_degenerate() {
        let data = vec![true, true, false, false, false, false, false, false];
        let mask = GridMask::from_data(4, 2, data);
        // A repeat of the previous round has IoU 1.0, past the 0.5 gate.
        assert!(is_degenerate(&mask, &mask.clone(), 8));
    }

    #[test]
    fn noise_sized_masks_are_degenerate() {
        let previous = GridMask::from_data(10, 10, {
            let mut data = vec![false; 100];
            data[0] = true;
            data[1] = true;
            data
        });
        let mut tiny = GridMask::new(10, 10);
        tiny.set(9, 9, true);
        assert!(is_degenerate(&previous, &tiny, 10_000));
    }

    #[test]
    fn distinct_objects_are_kept() {
        let mut previous = GridMask::new(4, 4);
        previous.set(0, 0, true);
        previous.set(1, 0, true);
        let mut candidate = GridMask::new(4, 4);
        candidate.set(3, 3, true);
        candidate.set(2, 3, true);
        assert!(!is_degenerate(&previous, &candidate, 16));
    }

    #[test]
    fn upsampling_replicates_patches() {
        let device = Device::Cpu;
        let grid = Tensor::from_vec(vec![1.0f32, 0.0, 0.0, 0.0], (2, 2), &device).unwrap();
        let up = upsample_nearest(&grid, 4, 4).unwrap();
        assert_eq!(up.len(), 16);
        assert_eq!(up[0], 1.0);
        assert_eq!(up[1], 1.0);
        assert_eq!(up[4], 1.0);
        assert_eq!(up[5], 1.0);
        assert_eq!(up[2], 0.0);
        assert_eq!(up[15], 0.0);
    }
}
