//! DINO vision transformer, loaded from timm-format checkpoints.
//!
//! Only the pieces needed for dense feature extraction are implemented: the
//! classification head is absent and the final block exposes its attention
//! projections so callers can read per-patch descriptors.

use candle_core::{IndexOp, Result, Tensor, D};
use candle_nn::{conv2d, layer_norm, linear, Conv2d, Conv2dConfig, LayerNorm, Linear, Module, VarBuilder};

/// Which projection of the last attention block supplies the patch descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeatureKind {
    /// Query projection.
    Query,
    /// Key projection. The usual choice for grouping tasks.
    #[default]
    Key,
    /// Value projection.
    Value,
    /// Query, key and value concatenated along the feature dimension.
    Concat,
}

/// Architecture hyperparameters for a DINO checkpoint.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Side length of one square patch, in pixels.
    pub patch_size: usize,
    /// Transformer width.
    pub embed_dim: usize,
    /// Number of transformer blocks.
    pub depth: usize,
    /// Attention heads per block.
    pub num_heads: usize,
    /// Image side length the positional embedding was trained at.
    pub pretrain_size: usize,
}

impl Config {
    /// ViT-S (384 wide, 12 blocks, 6 heads) at the given patch size.
    pub fn vit_small(patch_size: usize) -> Self {
        Self {
            patch_size,
            embed_dim: 384,
            depth: 12,
            num_heads: 6,
            pretrain_size: 224,
        }
    }

    /// ViT-B (768 wide, 12 blocks, 12 heads) at the given patch size.
    pub fn vit_base(patch_size: usize) -> Self {
        Self {
            patch_size,
            embed_dim: 768,
            depth: 12,
            num_heads: 12,
            pretrain_size: 224,
        }
    }

    /// Width of the descriptors produced for a [`FeatureKind`].
    pub fn feature_dim(&self, kind: FeatureKind) -> usize {
        match kind {
            FeatureKind::Concat => self.embed_dim * 3,
            _ => self.embed_dim,
        }
    }

    fn pretrain_grid(&self) -> usize {
        self.pretrain_size / self.patch_size
    }
}

#[derive(Debug)]
struct PatchEmbed {
    proj: Conv2d,
}

impl PatchEmbed {
    fn new(cfg: &Config, vb: VarBuilder) -> Result<Self> {
        let conv_cfg = Conv2dConfig {
            stride: cfg.patch_size,
            ..Default::default()
        };
        let proj = conv2d(3, cfg.embed_dim, cfg.patch_size, conv_cfg, vb.pp("proj"))?;
        Ok(Self { proj })
    }

    /// (B, 3, H, W) -> (B, N, D) with N = (H / ps) * (W / ps).
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = self.proj.forward(xs)?;
        let (b, d, gh, gw) = xs.dims4()?;
        xs.reshape((b, d, gh * gw))?.transpose(1, 2)?.contiguous()
    }
}

#[derive(Debug)]
struct Attention {
    qkv: Linear,
    proj: Linear,
    num_heads: usize,
    scale: f64,
}

impl Attention {
    fn new(cfg: &Config, vb: VarBuilder) -> Result<Self> {
        let dim = cfg.embed_dim;
        let qkv = linear(dim, dim * 3, vb.pp("qkv"))?;
        let proj = linear(dim, dim, vb.pp("proj"))?;
        let head_dim = dim / cfg.num_heads;
        Ok(Self {
            qkv,
            proj,
            num_heads: cfg.num_heads,
            scale: (head_dim as f64).powf(-0.5),
        })
    }

    /// The per-head projections, each shaped (B, heads, N, head_dim).
    fn qkv_projections(&self, xs: &Tensor) -> Result<(Tensor, Tensor, Tensor)> {
        let (b, n, c) = xs.dims3()?;
        let qkv = self
            .qkv
            .forward(xs)?
            .reshape((b, n, 3, self.num_heads, c / self.num_heads))?
            .permute((2, 0, 3, 1, 4))?;
        Ok((qkv.i(0)?, qkv.i(1)?, qkv.i(2)?))
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (b, n, c) = xs.dims3()?;
        let (q, k, v) = self.qkv_projections(xs)?;
        let attn = (q.contiguous()?.matmul(&k.t()?.contiguous()?)? * self.scale)?;
        let attn = candle_nn::ops::softmax(&attn, D::Minus1)?;
        let out = attn.matmul(&v.contiguous()?)?;
        let out = out.transpose(1, 2)?.contiguous()?.reshape((b, n, c))?;
        self.proj.forward(&out)
    }
}

#[derive(Debug)]
struct Mlp {
    fc1: Linear,
    fc2: Linear,
}

impl Mlp {
    fn new(cfg: &Config, vb: VarBuilder) -> Result<Self> {
        let dim = cfg.embed_dim;
        let hidden = dim * 4;
        Ok(Self {
            fc1: linear(dim, hidden, vb.pp("fc1"))?,
            fc2: linear(hidden, dim, vb.pp("fc2"))?,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.fc2.forward(&self.fc1.forward(xs)?.gelu_erf()?)
    }
}

#[derive(Debug)]
struct Block {
    norm1: LayerNorm,
    attn: Attention,
    norm2: LayerNorm,
    mlp: Mlp,
}

impl Block {
    fn new(cfg: &Config, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            norm1: layer_norm(cfg.embed_dim, 1e-6, vb.pp("norm1"))?,
            attn: Attention::new(cfg, vb.pp("attn"))?,
            norm2: layer_norm(cfg.embed_dim, 1e-6, vb.pp("norm2"))?,
            mlp: Mlp::new(cfg, vb.pp("mlp"))?,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = (xs + self.attn.forward(&self.norm1.forward(xs)?)?)?;
        &xs + self.mlp.forward(&self.norm2.forward(&xs)?)?
    }
}

/// A DINO vision transformer without its projection head.
#[derive(Debug)]
pub struct VisionTransformer {
    cls_token: Tensor,
    pos_embed: Tensor,
    patch_embed: PatchEmbed,
    blocks: Vec<Block>,
    config: Config,
}

impl VisionTransformer {
    /// Load the transformer from a timm-format checkpoint.
    pub fn new(config: Config, vb: VarBuilder) -> Result<Self> {
        let dim = config.embed_dim;
        let grid = config.pretrain_grid();
        let cls_token = vb.get((1, 1, dim), "cls_token")?;
        let pos_embed = vb.get((1, 1 + grid * grid, dim), "pos_embed")?;
        let patch_embed = PatchEmbed::new(&config, vb.pp("patch_embed"))?;
        let mut blocks = Vec::with_capacity(config.depth);
        for i in 0..config.depth {
            blocks.push(Block::new(&config, vb.pp(format!("blocks.{i}")))?);
        }
        Ok(Self {
            cls_token,
            pos_embed,
            patch_embed,
            blocks,
            config,
        })
    }

    /// The architecture this transformer was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Positional embedding resampled to a `gh` x `gw` patch grid.
    ///
    /// Checkpoints carry embeddings for the pretraining resolution only; for
    /// other input sizes the patch part is bilinearly resampled on the host.
    fn interpolated_pos_embed(&self, gh: usize, gw: usize) -> Result<Tensor> {
        let dim = self.config.embed_dim;
        let g0 = self.config.pretrain_grid();
        if gh == g0 && gw == g0 {
            return Ok(self.pos_embed.clone());
        }
        let cls_pos = self.pos_embed.narrow(1, 0, 1)?;
        let patch_pos = self.pos_embed.narrow(1, 1, g0 * g0)?;
        let source = patch_pos.to_device(&candle_core::Device::Cpu)?.reshape((g0, g0, dim))?;
        let source = source.to_vec3::<f32>()?;
        let mut resampled = vec![0f32; gh * gw * dim];
        for y in 0..gh {
            // Align grid centers between the two resolutions.
            let sy = (y as f32 + 0.5) * g0 as f32 / gh as f32 - 0.5;
            let y0 = sy.floor().clamp(0.0, (g0 - 1) as f32) as usize;
            let y1 = (y0 + 1).min(g0 - 1);
            let fy = (sy - y0 as f32).clamp(0.0, 1.0);
            for x in 0..gw {
                let sx = (x as f32 + 0.5) * g0 as f32 / gw as f32 - 0.5;
                let x0 = sx.floor().clamp(0.0, (g0 - 1) as f32) as usize;
                let x1 = (x0 + 1).min(g0 - 1);
                let fx = (sx - x0 as f32).clamp(0.0, 1.0);
                let out = &mut resampled[(y * gw + x) * dim..(y * gw + x + 1) * dim];
                for d in 0..dim {
                    let top = source[y0][x0][d] * (1.0 - fx) + source[y0][x1][d] * fx;
                    let bottom = source[y1][x0][d] * (1.0 - fx) + source[y1][x1][d] * fx;
                    out[d] = top * (1.0 - fy) + bottom * fy;
                }
            }
        }
        let patch_pos = Tensor::from_vec(resampled, (1, gh * gw, dim), self.pos_embed.device())?;
        Tensor::cat(&[&cls_pos, &patch_pos], 1)
    }

    /// Dense patch descriptors from the last attention block.
    ///
    /// Input is (B, 3, H, W) with H and W multiples of the patch size; output
    /// is (B, D, P) with P the number of patches and D given by
    /// [`Config::feature_dim`]. The class token is dropped.
    pub fn forward_features(&self, xs: &Tensor, kind: FeatureKind) -> Result<Tensor> {
        let (b, _c, h, w) = xs.dims4()?;
        let ps = self.config.patch_size;
        let (gh, gw) = (h / ps, w / ps);
        let dim = self.config.embed_dim;

        let patches = self.patch_embed.forward(xs)?;
        let cls = self.cls_token.expand((b, 1, dim))?;
        let mut x = Tensor::cat(&[&cls, &patches], 1)?;
        x = x.broadcast_add(&self.interpolated_pos_embed(gh, gw)?)?;

        let (last, rest) = self
            .blocks
            .split_last()
            .ok_or_else(|| candle_core::Error::Msg("transformer has no blocks".into()))?;
        for block in rest {
            x = block.forward(&x)?;
        }

        let x = last.norm1.forward(&x)?;
        let (q, k, v) = last.attn.qkv_projections(&x)?;
        let feats = match kind {
            FeatureKind::Query => merge_heads(&q)?,
            FeatureKind::Key => merge_heads(&k)?,
            FeatureKind::Value => merge_heads(&v)?,
            FeatureKind::Concat => Tensor::cat(
                &[merge_heads(&q)?, merge_heads(&k)?, merge_heads(&v)?],
                D::Minus1,
            )?,
        };
        // Drop the class token and move the feature axis first.
        feats.narrow(1, 1, gh * gw)?.transpose(1, 2)?.contiguous()
    }
}

/// (B, heads, N, head_dim) -> (B, N, heads * head_dim).
fn merge_heads(xs: &Tensor) -> Result<Tensor> {
    let (b, heads, n, head_dim) = xs.dims4()?;
    xs.transpose(1, 2)?.contiguous()?.reshape((b, n, heads * head_dim))
}
