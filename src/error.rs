//! Error types for segmented image store operations

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Capacity error: {0}")]
    Capacity(String),

    #[error("Allocation error: {0}")]
    Allocation(String),

    #[error("IO error on \"{}\": {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    IoPlain(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl StoreError {
    /// Wrap an I/O error with the file it occurred on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for any error raised by the backing files
    pub fn is_io(&self) -> bool {
        matches!(self, StoreError::Io { .. } | StoreError::IoPlain(_))
    }
}

/// Specialized Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
