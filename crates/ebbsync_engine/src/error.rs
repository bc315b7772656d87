//! Error types for the sync engine.

use ebbsync_protocol::ProtocolError;
use ebbsync_storage::StorageError;
use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for calls into the remote store.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors returned by the engine's own API.
///
/// Remote failures never surface here: they are absorbed by the flush and
/// reported through the status publisher.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Local store error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid operation or undecodable payload.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The table or cache key is not a monitored resource.
    #[error("unknown resource: {0}")]
    UnknownResource(String),

    /// A cached value could not be decoded.
    #[error("cache entry {key} is corrupted: {message}")]
    CorruptedCache {
        /// Cache key.
        key: String,
        /// Decoder message.
        message: String,
    },
}

/// Errors reported by a remote store client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The server could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// The call timed out in the client.
    #[error("request timed out")]
    Timeout,

    /// The server failed while handling the request.
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP-like status code.
        status: u16,
        /// Server message.
        message: String,
    },

    /// The server rejected the payload (validation, constraint).
    #[error("rejected: {0}")]
    Rejected(String),

    /// The caller is not allowed to perform the call.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl RemoteError {
    /// Returns true if repeating the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::Network(_) | RemoteError::Timeout | RemoteError::Server { .. }
        )
    }
}

/// Whether a failed execution is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network, timeout, or server-side failure.
    Transient,
    /// Validation or authorization failure.
    Permanent,
}

/// Normalized outcome of a failed remote execution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ExecError {
    /// Human-readable failure message.
    pub message: String,
    /// Failure category.
    pub kind: FailureKind,
}

impl ExecError {
    /// Returns true if the failure is permanent.
    pub fn is_permanent(&self) -> bool {
        self.kind == FailureKind::Permanent
    }
}

impl From<RemoteError> for ExecError {
    fn from(err: RemoteError) -> Self {
        let kind = if err.is_transient() {
            FailureKind::Transient
        } else {
            FailureKind::Permanent
        };
        Self {
            message: err.to_string(),
            kind,
        }
    }
}
