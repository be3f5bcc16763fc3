//! Content store errors.

use crate::cid::Cid;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias for content store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Content store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Source file is missing or unreadable
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// CID is not held by this store
    #[error("content not found: {0}")]
    ContentNotFound(Cid),

    /// Chunk index is not held for this CID
    #[error("chunk {index} of {cid} not found")]
    ChunkNotFound {
        /// Content identifier
        cid: Cid,
        /// Chunk index
        index: u64,
    },

    /// Chunk or root hash did not match
    #[error("integrity check failed for {cid}: {detail}")]
    Integrity {
        /// Content identifier
        cid: Cid,
        /// What failed to verify
        detail: String,
    },

    /// Staged import committed before all chunks arrived
    #[error("import of {cid} incomplete: {missing} chunk(s) missing")]
    Incomplete {
        /// Content identifier
        cid: Cid,
        /// Missing chunk count
        missing: u64,
    },

    /// Manifest could not be encoded or decoded
    #[error("manifest error: {0}")]
    Manifest(String),

    /// Invalid chunk size
    #[error("invalid chunk size {0}")]
    InvalidChunkSize(usize),

    /// Underlying disk failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Returns true if the error means "we don't have it"
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::FileNotFound(_)
                | StoreError::ContentNotFound(_)
                | StoreError::ChunkNotFound { .. }
        )
    }

    pub(crate) fn integrity(cid: Cid, detail: impl Into<String>) -> Self {
        StoreError::Integrity {
            cid,
            detail: detail.into(),
        }
    }
}
