//! Error Handling Module
//!
//! Defines the error type shared by every stage of an experiment run.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for experiment operations
#[derive(Error, Debug)]
pub enum ExperimentError {
    /// Error loading or decoding an image
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Error with dataset operations
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error with model assembly or weight loading
    #[error("Model error: {0}")]
    Model(String),

    /// Error during training
    #[error("Training error: {0}")]
    Training(String),

    /// Configuration error (bad CLI flags, grid files, settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A hyperparameter value that cannot be encoded into a run identifier
    #[error("Invalid hyperparameter '{key}': {reason}")]
    InvalidParam { key: String, reason: String },

    /// Classifier head type that has no implementation
    #[error("Unsupported classifier type: {0}")]
    UnsupportedClassifier(String),

    /// Freeze structure string outside `freezeall | unfreezeall | unfreezetop<N>`
    #[error("Invalid structure parameter '{0}': expected freezeall, unfreezeall or unfreezetop<N>")]
    InvalidStructure(String),

    /// Explicitly requested pretrained weight file does not exist
    #[error("Pretrained weights for {backbone} not found at '{path}'")]
    PretrainedWeightsMissing { backbone: String, path: PathBuf },

    /// No checkpoint exists for the requested configuration
    #[error("No checkpoint found at '{0}'; run this experiment first")]
    CheckpointMissing(PathBuf),

    /// Error while reading or writing a record file
    #[error("Record error: {0}")]
    Record(String),

    /// Error while downloading a file
    #[error("Download error: {0}")]
    Download(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

impl From<serde_json::Error> for ExperimentError {
    fn from(err: serde_json::Error) -> Self {
        ExperimentError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ExperimentError {
    fn from(err: toml::de::Error) -> Self {
        ExperimentError::Config(err.to_string())
    }
}

impl From<burn::record::RecorderError> for ExperimentError {
    fn from(err: burn::record::RecorderError) -> Self {
        ExperimentError::Record(format!("{:?}", err))
    }
}

/// Convenience Result type for experiment operations
pub type Result<T> = std::result::Result<T, ExperimentError>;

impl ExperimentError {
    /// Shorthand for an [`ExperimentError::InvalidParam`]
    pub fn invalid_param(key: impl Into<String>, reason: impl Into<String>) -> Self {
        ExperimentError::InvalidParam {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
