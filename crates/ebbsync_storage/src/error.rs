//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Writing the value would exceed the store's byte quota.
    #[error("storage quota exceeded writing {key}: {required} bytes needed, limit {limit}")]
    QuotaExceeded {
        /// The key being written.
        key: String,
        /// Total bytes the store would hold after the write.
        required: usize,
        /// The configured limit.
        limit: usize,
    },

    /// The key contains characters the store cannot represent.
    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),

    /// A stored value is not valid UTF-8 or otherwise unreadable.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the store's directory lock.
    #[error("store is locked by another process")]
    Locked,
}
