//! # pseudocut
//!
//! Unsupervised pseudo-mask discovery. Patch descriptors from a
//! self-supervised [DINO](https://github.com/facebookresearch/dino) backbone
//! are turned into a thresholded similarity graph; the graph's low
//! generalized eigenvectors yield a foreground/background cut; an iterative
//! loop masks out each discovered object and re-partitions to find the next
//! one. Accepted masks are refined against image edges and exported as a
//! COCO-style annotation document.
//!
//! ## Usage
//!
//! ```rust, no_run
//! use pseudocut::*;
//!
//! let backbone = DinoFeatures::builder().build().unwrap();
//! let options = RunOptions::new("imagenet/train", "out");
//! let summary = chunk::run(&backbone, &options).unwrap();
//! println!(
//!     "{} images, {} annotations",
//!     summary.images, summary.annotations
//! );
//! ```

#![warn(missing_docs)]

pub mod chunk;
pub mod coco;
pub mod discover;
mod error;
pub mod export;
pub mod graph;
pub mod metric;
pub mod orientation;
pub mod preprocess;
pub mod refine;
pub mod region;
pub mod spectral;

pub use chunk::{RunOptions, RunSummary};
pub use discover::{Discovery, DiscoverOptions};
pub use error::{PseudocutError, Result};
pub use rdino::{Config as DinoConfig, DinoFeatures, DinoFeaturesBuilder, DinoSource, FeatureKind};

/// A binary mask over a rectangular grid, row-major.
///
/// Used at patch resolution for bipartitions and connected components, and at
/// pixel resolution for refined masks headed to export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridMask {
    width: usize,
    height: usize,
    data: Vec<bool>,
}

impl GridMask {
    /// An all-background mask.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![false; width * height],
        }
    }

    /// Wrap row-major data. Panics when the buffer does not match the
    /// dimensions.
    pub fn from_data(width: usize, height: usize, data: Vec<bool>) -> Self {
        assert_eq!(data.len(), width * height, "mask buffer mismatch");
        Self {
            width,
            height,
            data,
        }
    }

    /// Threshold a soft map into a mask.
    pub fn from_map(map: &[f32], width: usize, height: usize, threshold: f32) -> Self {
        assert_eq!(map.len(), width * height, "map buffer mismatch");
        Self {
            width,
            height,
            data: map.iter().map(|&v| v >= threshold).collect(),
        }
    }

    /// Grid width.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Grid height.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Cell value at (x, y).
    pub fn get(&self, x: usize, y: usize) -> bool {
        self.data[y * self.width + x]
    }

    /// Set the cell at (x, y).
    pub fn set(&mut self, x: usize, y: usize, value: bool) {
        self.data[y * self.width + x] = value;
    }

    /// The row-major cell buffer.
    pub fn data(&self) -> &[bool] {
        &self.data
    }

    /// Number of foreground cells.
    pub fn count_ones(&self) -> usize {
        self.data.iter().filter(|&&b| b).count()
    }

    /// The mask as a row-major {0, 1} float buffer.
    pub fn to_f32(&self) -> Vec<f32> {
        self.data
            .iter()
            .map(|&b| if b { 1.0 } else { 0.0 })
            .collect()
    }
}
