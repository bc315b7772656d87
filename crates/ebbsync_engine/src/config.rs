//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use ebbsync_protocol::ConflictPolicy;
use ebbsync_storage::validate_key;
use std::collections::HashSet;
use std::time::Duration;

/// Default local storage key of the persisted queue.
pub const DEFAULT_QUEUE_KEY: &str = "ebbsync_sync_queue";

/// Default local storage key of the last successful flush time.
pub const DEFAULT_LAST_SYNC_KEY: &str = "ebbsync_last_sync";

/// Default column that scopes rows to their owner.
pub const DEFAULT_OWNER_COLUMN: &str = "user_id";

/// Shape of a monitored resource in the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// One row per identity, cached as a JSON object.
    Singleton,
    /// Many rows per identity, cached as a JSON array keyed by `id`.
    Collection,
}

/// A remote table mirrored in the local cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Remote table name.
    pub table: String,
    /// Local storage key of the cached copy.
    pub cache_key: String,
    /// Singleton or collection.
    pub kind: ResourceKind,
    /// Column holding the owning identity.
    pub owner_column: String,
}

impl Resource {
    /// Creates a singleton resource cached under its table name.
    pub fn singleton(table: impl Into<String>) -> Self {
        Self::new(table.into(), ResourceKind::Singleton)
    }

    /// Creates a collection resource cached under its table name.
    pub fn collection(table: impl Into<String>) -> Self {
        Self::new(table.into(), ResourceKind::Collection)
    }

    fn new(table: String, kind: ResourceKind) -> Self {
        Self {
            cache_key: table.clone(),
            table,
            kind,
            owner_column: DEFAULT_OWNER_COLUMN.to_string(),
        }
    }

    /// Sets the local storage key.
    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = key.into();
        self
    }

    /// Sets the owner column.
    pub fn with_owner_column(mut self, column: impl Into<String>) -> Self {
        self.owner_column = column.into();
        self
    }

    /// Returns true for collection resources.
    pub fn is_collection(&self) -> bool {
        self.kind == ResourceKind::Collection
    }
}

/// Configuration for the sync engine.
///
/// The engine takes ownership of its configuration at construction; it is
/// never modified afterwards.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Cadence of the periodic flush.
    pub sync_interval: Duration,
    /// Executions an item gets before it is dropped.
    pub retry_attempts: u32,
    /// Base delay before a flush that retries failed items.
    pub retry_delay: Duration,
    /// Maximum items dispatched by one flush.
    pub batch_size: usize,
    /// Maximum queued items; the oldest is evicted beyond this.
    pub queue_capacity: usize,
    /// Pull-time conflict policy.
    pub conflict_policy: ConflictPolicy,
    /// Drop permanently failing items without using up their retries.
    pub drop_permanent_failures: bool,
    /// Resources pulled after each flush and subscribed for realtime changes.
    pub resources: Vec<Resource>,
    /// Local storage key of the persisted queue.
    pub queue_key: String,
    /// Local storage key of the last successful flush time.
    pub last_sync_key: String,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            sync_interval: Duration::from_secs(5),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            batch_size: 50,
            queue_capacity: 100,
            conflict_policy: ConflictPolicy::ServerWins,
            drop_permanent_failures: false,
            resources: Vec::new(),
            queue_key: DEFAULT_QUEUE_KEY.to_string(),
            last_sync_key: DEFAULT_LAST_SYNC_KEY.to_string(),
        }
    }

    /// Sets the periodic flush interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the retry ceiling.
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Sets the base retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the per-flush batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Drops permanent failures immediately instead of retrying them.
    pub fn with_drop_permanent_failures(mut self, drop: bool) -> Self {
        self.drop_permanent_failures = drop;
        self
    }

    /// Adds a monitored resource.
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resources.push(resource);
        self
    }

    /// Sets the local storage key of the queue.
    pub fn with_queue_key(mut self, key: impl Into<String>) -> Self {
        self.queue_key = key.into();
        self
    }

    /// Sets the local storage key of the last flush time.
    pub fn with_last_sync_key(mut self, key: impl Into<String>) -> Self {
        self.last_sync_key = key.into();
        self
    }

    /// Delay before retrying an item that has failed `attempts` times.
    ///
    /// Doubles per attempt starting at `retry_delay`, capped at
    /// `sync_interval` since the periodic flush retries anyway.
    pub fn retry_delay_for(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32 << attempts.saturating_sub(1).min(16);
        self.retry_delay
            .saturating_mul(factor)
            .min(self.sync_interval)
    }

    /// Checks the configuration for values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] describing the first problem found.
    pub fn validate(&self) -> SyncResult<()> {
        if self.queue_capacity == 0 {
            return Err(SyncError::Config("queue_capacity must be at least 1".into()));
        }
        if self.retry_attempts == 0 {
            return Err(SyncError::Config("retry_attempts must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(SyncError::Config("batch_size must be at least 1".into()));
        }
        if self.sync_interval.is_zero() {
            return Err(SyncError::Config("sync_interval must be positive".into()));
        }

        let mut keys = HashSet::new();
        keys.insert(self.queue_key.as_str());
        keys.insert(self.last_sync_key.as_str());
        if keys.len() != 2 {
            return Err(SyncError::Config(
                "queue_key and last_sync_key must differ".into(),
            ));
        }
        for key in [&self.queue_key, &self.last_sync_key] {
            validate_key(key).map_err(|e| SyncError::Config(e.to_string()))?;
        }

        let mut tables = HashSet::new();
        for resource in &self.resources {
            validate_key(&resource.cache_key).map_err(|e| SyncError::Config(e.to_string()))?;
            if !keys.insert(resource.cache_key.as_str()) {
                return Err(SyncError::Config(format!(
                    "cache key {} is used twice",
                    resource.cache_key
                )));
            }
            if !tables.insert(resource.table.as_str()) {
                return Err(SyncError::Config(format!(
                    "table {} is monitored twice",
                    resource.table
                )));
            }
            if resource.owner_column.is_empty() {
                return Err(SyncError::Config(format!(
                    "resource {} has an empty owner column",
                    resource.table
                )));
            }
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
