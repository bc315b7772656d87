//! Error types for protocol values.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised when building or decoding protocol values.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The table name is empty or contains whitespace.
    #[error("invalid table name: {0:?}")]
    InvalidTable(String),

    /// The operation kind requires a data record.
    #[error("{kind} operation on {table} requires data")]
    MissingData {
        /// Operation kind.
        kind: &'static str,
        /// Target table.
        table: String,
    },

    /// The operation kind requires at least one filter.
    #[error("{kind} operation on {table} requires at least one filter")]
    MissingFilters {
        /// Operation kind.
        kind: &'static str,
        /// Target table.
        table: String,
    },

    /// The operation kind does not accept filters.
    #[error("{kind} operation on {table} does not accept filters")]
    UnexpectedFilters {
        /// Operation kind.
        kind: &'static str,
        /// Target table.
        table: String,
    },

    /// Delete operations carry no data.
    #[error("delete operation on {0} does not accept data")]
    UnexpectedData(String),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
