//! Crate-wide error type.

use std::path::PathBuf;

use thiserror::Error;

/// Everything that can stop a training run before it completes.
///
/// Divergence (a non-finite loss) is deliberately *not* an error: the
/// trainer reports it through `TrainOutcome::Diverged` instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Minimum training resolution is not a multiple of the grid size.
    #[error("--img-size {size} must be a {grid}-multiple")]
    Resolution { size: u32, grid: u32 },

    #[error("Corrupt checkpoint {path:?}: {reason}")]
    CorruptCheckpoint { path: PathBuf, reason: String },

    #[error("Checkpoint not found: {0:?}")]
    MissingCheckpoint(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    #[error("Image error: {0}")]
    Image(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Image(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
