//! Collaborator interfaces consumed by the engine.
//!
//! The engine never talks to the network, the platform, or the user session
//! directly. These traits abstract the remote store client, the realtime push
//! channel, the identity provider and the clock, so tests can substitute
//! the in-memory versions from [`crate::memory`].

use crate::error::RemoteResult;
use async_trait::async_trait;
use ebbsync_protocol::{ChangeEvent, Filters, Record};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::UnboundedReceiver;

/// A remote store client with row-level CRUD.
///
/// Every mutating call returns the rows it affected, which the engine takes
/// as confirmation that the write is durable on the server. Filters are an
/// equality conjunction over columns.
///
/// Timeouts are the client's business; a timed-out call should return
/// [`crate::RemoteError::Timeout`].
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Inserts a row.
    async fn create(&self, table: &str, record: &Record) -> RemoteResult<Vec<Record>>;

    /// Reads the rows matching `filters`.
    async fn select(&self, table: &str, filters: &Filters) -> RemoteResult<Vec<Record>>;

    /// Applies `changes` to the rows matching `filters`.
    async fn update(
        &self,
        table: &str,
        changes: &Record,
        filters: &Filters,
    ) -> RemoteResult<Vec<Record>>;

    /// Deletes the rows matching `filters`.
    async fn delete(&self, table: &str, filters: &Filters) -> RemoteResult<Vec<Record>>;

    /// Inserts or replaces a row, resolving duplicates on `on_conflict`
    /// (the primary key when `None`).
    async fn upsert(
        &self,
        table: &str,
        record: &Record,
        on_conflict: Option<&str>,
    ) -> RemoteResult<Vec<Record>>;
}

/// Stream of change events for one subscription. Dropping it unsubscribes.
pub type ChangeStream = UnboundedReceiver<ChangeEvent>;

/// A server-to-client push channel.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Subscribes to changes of `table` restricted to rows matching `filter`.
    async fn subscribe(&self, table: &str, filter: &Filters) -> RemoteResult<ChangeStream>;
}

/// The identity of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// Creates an identity from its id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of the current identity.
pub trait IdentityProvider: Send + Sync {
    /// Returns the signed-in identity, or `None` when signed out.
    fn current_identity(&self) -> Option<Identity>;
}

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now_millis() > 1_577_836_800_000);
    }

    #[test]
    fn identity_display() {
        let id = Identity::new("u-42");
        assert_eq!(id.as_str(), "u-42");
        assert_eq!(id.to_string(), "u-42");
    }
}
