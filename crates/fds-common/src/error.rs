//! Error types for FDS

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for FDS operations
pub type Result<T> = std::result::Result<T, FdsError>;

/// Main error type for FDS
///
/// Row-level problems never show up here: a malformed or irrelevant log line
/// is a rejection value, not an error, and a corrupt archive ends its stream
/// with a `StreamFailure`. These variants describe failures of a sink, of a
/// missing input, or of the configuration phase.
#[derive(Error, Debug)]
pub enum FdsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Input file does not exist: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("Sink error: {0}")]
    Sink(String),
}

impl FdsError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a sink error
    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink(msg.into())
    }
}
