use thiserror::Error;

/// Errors produced while generating pseudo-masks.
///
/// The chunk driver treats [`Io`](PseudocutError::Io) and
/// [`Json`](PseudocutError::Json) as fatal; every other variant is contained
/// to the image that raised it.
#[derive(Debug, Error)]
pub enum PseudocutError {
    /// The image could not be read or decoded.
    #[error(transparent)]
    Image(#[from] image::ImageError),

    /// A tensor operation failed.
    #[error(transparent)]
    Tensor(#[from] candle_core::Error),

    /// The eigensolver could not produce a usable spectrum.
    #[error("eigendecomposition failed: {0}")]
    Solver(String),

    /// The feature backbone failed.
    #[error(transparent)]
    Backbone(#[from] anyhow::Error),

    /// Filesystem failure while writing chunk output.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The annotation document could not be serialized.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PseudocutError>;
