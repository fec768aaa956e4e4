use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use pseudocut::{
    chunk, DinoConfig, DinoFeatures, DinoSource, DiscoverOptions, FeatureKind, RunOptions,
};

#[derive(Parser)]
#[command(
    name = "pseudocut",
    about = "Generate pseudo-mask annotations for a directory of images"
)]
struct Cli {
    /// Directory of input images
    #[arg(long, default_value = "imagenet/train")]
    dataset_path: PathBuf,

    /// Output directory for chunk documents and the checkpoint file
    #[arg(long)]
    out_dir: PathBuf,

    /// Backbone architecture
    #[arg(long, value_enum, default_value = "small")]
    vit_arch: VitArch,

    /// Which attention projection supplies the patch features
    #[arg(long, value_enum, default_value = "k")]
    vit_feat: VitFeat,

    /// Patch size in pixels (8 or 16)
    #[arg(long, default_value_t = 16)]
    patch_size: u32,

    /// Similarity threshold for affinity-graph construction
    #[arg(long, default_value_t = 0.2)]
    tau: f32,

    /// Rescale input images to this fixed side length
    #[arg(long, default_value_t = 480)]
    fixed_size: u32,

    /// Number of images per chunk
    #[arg(long, default_value_t = 1000)]
    chunk_size: usize,

    /// Process only this chunk index (for sharding across jobs)
    #[arg(long)]
    job_index: Option<u64>,

    /// Maximum number of pseudo-masks per image
    #[arg(long, default_value_t = 3)]
    n: usize,

    /// Local safetensors weights to load instead of the hub checkpoint
    #[arg(long)]
    pretrain_path: Option<PathBuf>,

    /// Run on CPU
    #[arg(long)]
    cpu: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VitArch {
    Small,
    Base,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VitFeat {
    K,
    Q,
    V,
    Kqv,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Cli::parse();

    let source = backbone_source(&args)?;
    let feature = match args.vit_feat {
        VitFeat::K => FeatureKind::Key,
        VitFeat::Q => FeatureKind::Query,
        VitFeat::V => FeatureKind::Value,
        VitFeat::Kqv => FeatureKind::Concat,
    };

    tracing::info!(
        "loading {:?} backbone with patch size {}",
        args.vit_arch,
        args.patch_size
    );
    let backbone = DinoFeatures::builder()
        .source(source)
        .feature(feature)
        .fixed_size(args.fixed_size)
        .cpu(args.cpu)
        .build()?;

    let mut options = RunOptions::new(&args.dataset_path, &args.out_dir);
    options.chunk_size = args.chunk_size;
    options.job_index = args.job_index;
    options.discover = DiscoverOptions {
        tau: args.tau,
        n_masks: args.n,
    };

    let summary = chunk::run(&backbone, &options)?;
    tracing::info!(
        "done: {} chunks, {} images, {} annotations, {} skipped",
        summary.chunks,
        summary.images,
        summary.annotations,
        summary.skipped
    );
    Ok(())
}

fn backbone_source(args: &Cli) -> Result<DinoSource> {
    if let Some(path) = &args.pretrain_path {
        let config = match (args.vit_arch, args.patch_size) {
            (VitArch::Small, ps @ (8 | 16)) => DinoConfig::vit_small(ps as usize),
            (VitArch::Base, ps @ (8 | 16)) => DinoConfig::vit_base(ps as usize),
            (_, other) => bail!("unsupported patch size {other}, expected 8 or 16"),
        };
        return Ok(DinoSource::from_file(path, config));
    }
    Ok(match (args.vit_arch, args.patch_size) {
        (VitArch::Small, 16) => DinoSource::vit_small_16(),
        (VitArch::Small, 8) => DinoSource::vit_small_8(),
        (VitArch::Base, 16) => DinoSource::vit_base_16(),
        (VitArch::Base, 8) => DinoSource::vit_base_8(),
        (_, other) => bail!("unsupported patch size {other}, expected 8 or 16"),
    })
}
