//! A local store with injectable failures.

use ebbsync_storage::{InMemoryStore, LocalStore, StorageError, StorageResult};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Wraps an [`InMemoryStore`] and fails reads or writes on demand.
#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: InMemoryStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl FaultyStore {
    /// Creates a store that does not fail yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `get` fail while `fail` is true.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every `set` and `remove` fail while `fail` is true.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `set` calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// The wrapped store.
    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    fn injected(what: &str) -> StorageError {
        StorageError::Io(io::Error::other(format!("injected {what} failure")))
    }
}

impl LocalStore for FaultyStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::injected("read"));
        }
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::injected("write"));
        }
        self.inner.set(key, value)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::injected("write"));
        }
        self.inner.remove(key)
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        self.inner.keys()
    }
}
