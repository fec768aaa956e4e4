//! # rdino
//! A rust wrapper for [DINO](https://github.com/facebookresearch/dino) vision
//! transformers, producing dense per-patch descriptors for unsupervised
//! grouping tasks.
//!
//! ## Usage
//!
//! ```rust, no_run
//! use rdino::*;
//!
//! let model = DinoFeatures::builder().build().unwrap();
//! let image = image::open("landscape.jpg").unwrap();
//! let features = model.patch_features(&image).unwrap();
//! println!(
//!     "{}x{} patches, {} dims",
//!     features.grid_height(),
//!     features.grid_width(),
//!     features.feature_dim().unwrap()
//! );
//! ```

#![warn(missing_docs)]
#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

#[cfg(feature = "accelerate")]
extern crate accelerate_src;

use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use image::DynamicImage;

mod raw;
mod source;

pub use raw::{Config, FeatureKind, VisionTransformer};
pub use source::DinoSource;

/// Mean of the ImageNet training distribution, per RGB channel.
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// Standard deviation of the ImageNet training distribution, per RGB channel.
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// A builder for [`DinoFeatures`].
#[derive(Default)]
pub struct DinoFeaturesBuilder {
    source: DinoSource,

    feature: FeatureKind,

    cpu: bool,

    fixed_size: Option<u32>,
}

impl DinoFeaturesBuilder {
    /// Sets the source of the model.
    pub fn source(mut self, source: DinoSource) -> Self {
        self.source = source;
        self
    }

    /// Sets which attention projection supplies the descriptors.
    pub fn feature(mut self, feature: FeatureKind) -> Self {
        self.feature = feature;
        self
    }

    /// Set to true to run the model on CPU.
    pub fn cpu(mut self, cpu: bool) -> Self {
        self.cpu = cpu;
        self
    }

    /// Side length images are rescaled to before feature extraction.
    pub fn fixed_size(mut self, fixed_size: u32) -> Self {
        self.fixed_size = Some(fixed_size);
        self
    }

    /// Builds the [`DinoFeatures`] model.
    pub fn build(self) -> anyhow::Result<DinoFeatures> {
        DinoFeatures::new(self)
    }
}

/// Dense descriptors for one image, one column per patch.
pub struct PatchFeatures {
    features: Tensor,
    grid: (usize, usize),
    image: DynamicImage,
}

impl PatchFeatures {
    /// The (D, P) feature tensor, P patches in row-major grid order.
    pub fn features(&self) -> &Tensor {
        &self.features
    }

    /// Patch rows in the feature grid.
    pub fn grid_height(&self) -> usize {
        self.grid.0
    }

    /// Patch columns in the feature grid.
    pub fn grid_width(&self) -> usize {
        self.grid.1
    }

    /// Width of one descriptor.
    pub fn feature_dim(&self) -> candle_core::Result<usize> {
        self.features.dim(0)
    }

    /// The resized image the features were computed from. Its dimensions are
    /// the working resolution of everything derived from these features.
    pub fn image(&self) -> &DynamicImage {
        &self.image
    }
}

/// A pretrained [DINO](https://github.com/facebookresearch/dino) feature
/// extractor.
pub struct DinoFeatures {
    device: Device,
    vit: VisionTransformer,
    feature: FeatureKind,
    fixed_size: u32,
}

impl DinoFeatures {
    /// Creates a new [`DinoFeaturesBuilder`].
    pub fn builder() -> DinoFeaturesBuilder {
        DinoFeaturesBuilder::default()
    }

    fn new(settings: DinoFeaturesBuilder) -> anyhow::Result<Self> {
        let DinoFeaturesBuilder {
            source,
            feature,
            cpu,
            fixed_size,
        } = settings;
        let weights = match &source.local {
            Some(path) => path.clone(),
            None => {
                let api = hf_hub::api::sync::Api::new()?;
                let api = api.model(source.repo.clone());
                api.get(&source.filename)?
            }
        };
        let device = device(cpu)?;
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, &device)? };
        let vit = VisionTransformer::new(source.config, vb)?;
        Ok(Self {
            device,
            vit,
            feature,
            fixed_size: fixed_size.unwrap_or(480),
        })
    }

    /// The device the model runs on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Side length of one patch, in pixels of the working image.
    pub fn patch_size(&self) -> usize {
        self.vit.config().patch_size
    }

    /// Extract per-patch descriptors for an image.
    ///
    /// The image is rescaled to the fixed working size, rounded down to whole
    /// patches, normalized with ImageNet statistics and run through the
    /// transformer. The returned [`PatchFeatures`] carries the working image
    /// alongside the (D, P) tensor.
    pub fn patch_features(&self, image: &DynamicImage) -> anyhow::Result<PatchFeatures> {
        let ps = self.patch_size() as u32;
        let image = image.resize_exact(
            self.fixed_size,
            self.fixed_size,
            image::imageops::FilterType::Lanczos3,
        );
        // Round down to a whole number of patches.
        let (w, h) = (
            (image.width() / ps) * ps,
            (image.height() / ps) * ps,
        );
        anyhow::ensure!(w > 0 && h > 0, "image smaller than one patch");
        let image = if (w, h) != (image.width(), image.height()) {
            image.resize_exact(w, h, image::imageops::FilterType::Lanczos3)
        } else {
            image
        };

        let tensor = self.image_to_tensor(&image)?;
        let feats = self.vit.forward_features(&tensor, self.feature)?;
        let feats = feats.i(0)?;
        Ok(PatchFeatures {
            features: feats,
            grid: ((h / ps) as usize, (w / ps) as usize),
            image,
        })
    }

    fn image_to_tensor(&self, image: &DynamicImage) -> anyhow::Result<Tensor> {
        let img = image.to_rgb8();
        let (width, height) = img.dimensions();
        let data = img.into_raw();
        let tensor = Tensor::from_vec(data, (height as usize, width as usize, 3), &self.device)?
            .permute((2, 0, 1))?
            .to_dtype(DType::F32)?
            .contiguous()?;
        let tensor = (tensor / 255.)?;
        let mean = Tensor::new(&IMAGENET_MEAN, &self.device)?.reshape((3, 1, 1))?;
        let std = Tensor::new(&IMAGENET_STD, &self.device)?.reshape((3, 1, 1))?;
        let tensor = tensor.broadcast_sub(&mean)?.broadcast_div(&std)?;
        Ok(tensor.unsqueeze(0)?)
    }
}

fn device(cpu: bool) -> anyhow::Result<Device> {
    if cpu {
        Ok(Device::Cpu)
    } else {
        let device = Device::cuda_if_available(0)?;
        if !device.is_cuda() {
            tracing::warn!(
                "Running on CPU, to run on GPU, build this example with `--features cuda`"
            );
        }
        Ok(device)
    }
}
