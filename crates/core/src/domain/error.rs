// Domain Error Types

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid queue item state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },
}

pub type Result<T> = std::result::Result<T, DomainError>;

/// Per-upload failure, delivered exactly once through the item's completion channel.
///
/// Cloneable so the queue can keep a copy on the finished item while the
/// caller receives its own.
#[derive(Error, Debug, Clone)]
pub enum UploadError {
    /// The destination or filename policy returned an error
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// Reading the inbound byte stream into memory failed
    #[error("Stream error: {0}")]
    Stream(#[source] Arc<std::io::Error>),

    /// The sink could not write, create or delete at `path`
    #[error("IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// Destination or filename missing at write time
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Write timed out after {0}ms")]
    TimedOut(u64),

    #[error("Write task panicked: {0}")]
    Panicked(String),

    #[error("Upload queue closed before the write finished")]
    QueueClosed,
}

impl UploadError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        UploadError::Io {
            path: path.display().to_string(),
            source: Arc::new(source),
        }
    }

    pub fn stream(source: std::io::Error) -> Self {
        UploadError::Stream(Arc::new(source))
    }

    pub fn resolution(err: impl std::fmt::Display) -> Self {
        UploadError::Resolution(err.to_string())
    }
}
