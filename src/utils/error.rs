//! Error Handling Module
//!
//! Defines the error taxonomy for dataset indexing, checkpoints, training and
//! explainability. Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the deepfake duel pipeline
#[derive(Error, Debug)]
pub enum DuelError {
    /// A required file or directory does not exist
    #[error("Path not found: {0}")]
    MissingPath(PathBuf),

    /// A class directory name outside the recognized domain classes
    #[error("Unknown domain class '{name}' at {path}")]
    UnknownClass { name: String, path: PathBuf },

    /// An image that cannot be opened or decoded
    #[error("Failed to decode image at '{path}': {reason}")]
    CorruptImage { path: PathBuf, reason: String },

    /// No checkpoint exists at the requested location
    #[error("Checkpoint not found: {0}")]
    CheckpointMissing(PathBuf),

    /// A checkpoint that exists but cannot be used with this model
    #[error("Incompatible checkpoint '{path}': {reason}")]
    CheckpointIncompatible { path: PathBuf, reason: String },

    /// A tensor or parameter whose shape differs from what the model expects
    #[error("Shape mismatch for '{name}': expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// NaN or infinite loss during a training or validation step
    #[error("Non-finite loss at epoch {epoch}, batch {batch}")]
    NonFiniteLoss { epoch: usize, batch: usize },

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Grad-CAM could not be produced
    #[error("Explainability error: {0}")]
    Explainability(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV writer error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DuelError {
    fn from(err: serde_json::Error) -> Self {
        DuelError::Serialization(err.to_string())
    }
}

impl From<walkdir::Error> for DuelError {
    fn from(err: walkdir::Error) -> Self {
        match err.into_io_error() {
            Some(io) => DuelError::Io(io),
            None => DuelError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "filesystem loop detected while scanning dataset",
            )),
        }
    }
}

/// Convenience Result type for pipeline operations
pub type Result<T> = std::result::Result<T, DuelError>;

impl DuelError {
    /// Whether the opt-in skip mode may drop the offending sample
    pub fn is_skippable(&self) -> bool {
        matches!(self, DuelError::CorruptImage { .. })
    }
}
