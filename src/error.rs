// Error types for recognizer artifacts.

use std::path::PathBuf;
use thiserror::Error;

/// Failures while loading or saving a recognizer model directory.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model not found at {0}")]
    NotFound(PathBuf),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse model file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid model: {0}")]
    Invalid(String),

    #[error("failed to compile patterns: {0}")]
    Pattern(#[from] regex::Error),
}

pub type ModelResult<T> = std::result::Result<T, ModelError>;
