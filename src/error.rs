//! Error types for the slicelimit service.

use thiserror::Error;

/// Main error type for slicelimit operations.
#[derive(Error, Debug)]
pub enum SliceLimitError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for SliceLimitError {
    fn from(err: config::ConfigError) -> Self {
        SliceLimitError::Config(err.to_string())
    }
}

/// Result type alias for slicelimit operations.
pub type Result<T> = std::result::Result<T, SliceLimitError>;
