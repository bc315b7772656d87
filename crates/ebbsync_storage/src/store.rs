//! Local store trait definition.

use crate::error::{StorageError, StorageResult};

/// A durable string key/value store on the client.
///
/// Stores are **opaque string maps**. They do not interpret the values they
/// hold; the engine owns the serialized queue and cache formats.
///
/// # Invariants
///
/// - `get` returns exactly the value passed to the last successful `set` for that key
/// - a successful `set` is durable before it returns
/// - `remove` of a missing key is not an error
/// - Stores must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait LocalStore: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the value cannot be read.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The key is invalid
    /// - The store's quota would be exceeded
    /// - An I/O error occurs
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Removes the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Lists every key currently stored, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be enumerated.
    fn keys(&self) -> StorageResult<Vec<String>>;
}

/// Checks that a key is usable by every store.
///
/// Keys are non-empty, at most 128 bytes, and limited to ASCII
/// alphanumerics plus `_`, `-` and `.` (but may not start with `.`), so they
/// map directly onto file names.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] otherwise.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let valid = !key.is_empty()
        && key.len() <= 128
        && !key.starts_with('.')
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}
