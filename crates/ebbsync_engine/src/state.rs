//! Engine status, flush reports and statistics.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Coarse state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Nothing running; the last flush (if any) had no dropped items.
    #[default]
    Idle,
    /// A flush is running.
    Syncing,
    /// The last flush dropped at least one item.
    Error,
    /// The remote store is unreachable; writes are queued.
    Offline,
}

impl SyncStatus {
    /// Returns the lowercase name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Error => "error",
            SyncStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    /// Whether the remote store is considered reachable.
    pub is_online: bool,
    /// Whether a flush is running.
    pub is_syncing: bool,
    /// Coarse state.
    pub status: SyncStatus,
    /// Number of queued items.
    pub queue_length: usize,
    /// Completion time of the last flush, in milliseconds since the Unix epoch.
    pub last_sync: Option<u64>,
}

impl EngineStatus {
    /// One-line human summary, e.g. `Synced 5m ago`.
    pub fn summary(&self, now_millis: u64) -> String {
        match self.status {
            SyncStatus::Idle => match self.last_sync {
                Some(at) => format!("Synced {}", time_ago(at, now_millis)),
                None => "Ready to sync".to_string(),
            },
            SyncStatus::Syncing => "Syncing...".to_string(),
            SyncStatus::Error => "Sync error - click to retry".to_string(),
            SyncStatus::Offline => "Offline - changes queued".to_string(),
        }
    }
}

/// Formats the age of `then` relative to `now` (both in milliseconds).
///
/// ```
/// use ebbsync_engine::time_ago;
///
/// assert_eq!(time_ago(0, 30_000), "just now");
/// assert_eq!(time_ago(0, 5 * 60_000), "5m ago");
/// ```
pub fn time_ago(then: u64, now: u64) -> String {
    let seconds = now.saturating_sub(then) / 1000;
    if seconds < 60 {
        return "just now".to_string();
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{minutes}m ago");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours}h ago");
    }
    format!("{}d ago", hours / 24)
}

/// Outcome of one flush.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Items the remote store confirmed.
    pub processed: usize,
    /// Items dropped after their last allowed attempt.
    pub failed: usize,
    /// Failed items put back for another attempt.
    pub requeued: usize,
    /// Items returned untouched (batch limit reached or went offline).
    pub deferred: usize,
    /// Suggested delay before retrying the requeued items.
    pub retry_after: Option<Duration>,
}

impl SyncReport {
    /// Returns true if the flush did nothing.
    pub fn is_noop(&self) -> bool {
        self.processed == 0 && self.failed == 0 && self.requeued == 0 && self.deferred == 0
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStats {
    /// Total number of flushes completed.
    pub cycles_completed: u64,
    /// Total number of items confirmed by the remote store.
    pub items_processed: u64,
    /// Total number of items dropped after failing.
    pub items_failed: u64,
    /// Total number of failed items requeued for another attempt.
    pub retries_scheduled: u64,
    /// Total number of items evicted by the capacity bound.
    pub items_evicted: u64,
    /// Total number of conflicts reported under the manual policy.
    pub conflicts_reported: u64,
    /// Last remote or pull error message.
    pub last_error: Option<String>,
}

/// Result of [`crate::SyncEngine::save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// No identity; only the local cache was written.
    LocalOnly,
    /// The remote store confirmed the write.
    Synced,
    /// The write was queued for a later flush.
    Queued {
        /// Id of the queued item.
        item_id: String,
        /// Failure of the direct attempt, if one was made.
        error: Option<String>,
    },
}
