//! In-memory store for testing.

use crate::error::{StorageError, StorageResult};
use crate::store::{validate_key, LocalStore};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory key/value store.
///
/// This store keeps all values in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Sessions that don't need persistence
///
/// An optional byte quota mimics browser-style storage limits: a `set` that
/// would push the total size of keys and values past the quota fails with
/// [`StorageError::QuotaExceeded`] and leaves the store unchanged.
///
/// # Example
///
/// ```rust
/// use ebbsync_storage::{InMemoryStore, LocalStore};
///
/// let store = InMemoryStore::with_quota(8);
/// assert!(store.set("k", "1234").is_ok());
/// assert!(store.set("k", "123456789").is_err());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
    quota: Option<usize>,
}

impl InMemoryStore {
    /// Creates a new empty store without a quota.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new empty store limited to `limit` bytes.
    #[must_use]
    pub fn with_quota(limit: usize) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            quota: Some(limit),
        }
    }

    /// Creates a store with pre-existing entries.
    ///
    /// Useful for testing restart scenarios.
    #[must_use]
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: RwLock::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
            quota: None,
        }
    }

    /// Returns the total bytes held (keys plus values).
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }

    /// Clears all entries.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl LocalStore for InMemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        validate_key(key)?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        validate_key(key)?;
        let mut entries = self.entries.write();

        if let Some(limit) = self.quota {
            let current: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let required = current + key.len() + value.len();
            if required > limit {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    required,
                    limit,
                });
            }
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}
