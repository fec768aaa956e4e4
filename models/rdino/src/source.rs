use std::path::PathBuf;

use crate::raw::Config;

/// The source of the pretrained backbone weights.
pub struct DinoSource {
    pub(crate) repo: String,
    pub(crate) filename: String,
    pub(crate) config: Config,
    pub(crate) local: Option<PathBuf>,
}

impl DinoSource {
    /// Creates a new [`DinoSource`] from a huggingface repo and filename.
    pub fn new(repo: impl Into<String>, filename: impl Into<String>, config: Config) -> Self {
        Self {
            repo: repo.into(),
            filename: filename.into(),
            config,
            local: None,
        }
    }

    /// Load weights from a local safetensors file instead of the hub.
    pub fn from_file(path: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            repo: String::new(),
            filename: String::new(),
            config,
            local: Some(path.into()),
        }
    }

    /// ViT-S/16 trained with DINO.
    pub fn vit_small_16() -> Self {
        Self::new(
            "timm/vit_small_patch16_224.dino",
            "model.safetensors",
            Config::vit_small(16),
        )
    }

    /// ViT-S/8 trained with DINO. Denser grid, slower.
    pub fn vit_small_8() -> Self {
        Self::new(
            "timm/vit_small_patch8_224.dino",
            "model.safetensors",
            Config::vit_small(8),
        )
    }

    /// ViT-B/16 trained with DINO.
    pub fn vit_base_16() -> Self {
        Self::new(
            "timm/vit_base_patch16_224.dino",
            "model.safetensors",
            Config::vit_base(16),
        )
    }

    /// ViT-B/8 trained with DINO.
    pub fn vit_base_8() -> Self {
        Self::new(
            "timm/vit_base_patch8_224.dino",
            "model.safetensors",
            Config::vit_base(8),
        )
    }
}

impl Default for DinoSource {
    fn default() -> Self {
        Self::vit_small_16()
    }
}
