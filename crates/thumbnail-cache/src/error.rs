//! Error taxonomy for the thumbnail pipeline
//!
//! Per-item failures (`CodecError`, `StoreError` on read/write) are contained by
//! the pipeline and only ever leave an item on its placeholder. `PipelineError`
//! is reserved for configuration-time failures that the caller must see.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to turn a source file into thumbnail bytes
#[derive(Debug, Error)]
pub enum CodecError {
    /// Source file missing, unsupported or corrupt
    #[error("unreadable source {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    /// Encoded thumbnail bytes (cached or freshly produced) do not decode
    #[error("thumbnail bytes do not decode: {0}")]
    CorruptThumbnail(String),

    /// The source decoded but the lossy re-encode failed
    #[error("thumbnail encode failed: {0}")]
    EncodeFailed(String),
}

impl CodecError {
    pub(crate) fn unreadable(path: &std::path::Path, reason: impl ToString) -> Self {
        CodecError::Unreadable {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Disk cache I/O failure
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::Io { source, .. } => source.kind() == io::ErrorKind::NotFound,
        }
    }
}

/// Configuration-time failures, surfaced once to whoever composes the pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("thumbnail cache root unavailable: {0}")]
    CacheRoot(#[from] StoreError),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),

    #[error("invalid pipeline configuration: {0}")]
    Config(String),
}
