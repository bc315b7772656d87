//! # ebbsync engine
//!
//! Offline-first synchronization between a local cache and a remote store.
//!
//! This crate provides:
//! - A durable, bounded mutation queue
//! - A single-flight flush with bounded retries
//! - A remote operation executor with transient/permanent classification
//! - Pull-time conflict policies (server wins, client wins, manual)
//! - A realtime listener merging server-pushed changes into the cache
//! - A background driver for the periodic timer, flush requests,
//!   connectivity changes and retry delays
//! - In-memory collaborators for tests
//!
//! ## Architecture
//!
//! Writes go through the queue first and are replayed later:
//! 1. `enqueue` persists the operation and requests a flush
//! 2. a flush drains the queue and executes each item in FIFO order
//! 3. transient failures are requeued ahead of newer writes
//! 4. the flush ends by pulling a fresh snapshot of every monitored resource
//!
//! ## Key Invariants
//!
//! - At most one flush runs at a time
//! - The queue never holds more than `queue_capacity` items
//! - Every queued item has been attempted fewer than `retry_attempts` times
//! - Remote failures never surface as errors; they show up in the status
//!   and the published events

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod driver;
mod engine;
mod error;
mod executor;
pub mod memory;
mod network;
mod publisher;
mod queue;
mod realtime;
mod state;
mod transport;

pub use cache::LocalCache;
pub use config::{
    Resource, ResourceKind, SyncConfig, DEFAULT_LAST_SYNC_KEY, DEFAULT_OWNER_COLUMN,
    DEFAULT_QUEUE_KEY,
};
pub use driver::{DriverHandle, SyncDriver};
pub use engine::{SyncEngine, SyncEngineBuilder};
pub use error::{ExecError, FailureKind, RemoteError, RemoteResult, SyncError, SyncResult};
pub use executor::RemoteExecutor;
pub use memory::{ManualClock, MemoryPushChannel, MemoryRemote, RemoteCall, StaticIdentity};
pub use network::{NetworkMonitor, NetworkTransition};
pub use publisher::{ObserverHandle, StatusObserver, StatusPublisher, SyncEvent};
pub use queue::{Enqueued, MutationQueue};
pub use realtime::RealtimeListener;
pub use state::{time_ago, EngineStatus, SaveOutcome, SyncReport, SyncStats, SyncStatus};
pub use transport::{
    ChangeStream, Clock, Identity, IdentityProvider, PushChannel, RemoteStore, SystemClock,
};
