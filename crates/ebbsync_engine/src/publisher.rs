//! Lifecycle event fan-out.

use crate::state::SyncReport;
use ebbsync_protocol::{ChangeEvent, Conflict};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// A lifecycle event published by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// An operation was appended to the queue.
    Queued {
        /// Id of the new item.
        item_id: String,
        /// Target table.
        table: String,
    },
    /// A flush started.
    SyncStart,
    /// A flush finished.
    SyncComplete(SyncReport),
    /// Connectivity came back.
    Online,
    /// Connectivity was lost.
    Offline,
    /// A pushed change was received.
    Realtime(ChangeEvent),
    /// A pulled snapshot disagrees with pending writes (manual policy).
    Conflict(Conflict),
    /// An item was evicted by the capacity bound.
    Evicted {
        /// Id of the evicted item.
        item_id: String,
        /// Target table.
        table: String,
    },
}

impl SyncEvent {
    /// Short kebab-case name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::Queued { .. } => "queued",
            SyncEvent::SyncStart => "sync-start",
            SyncEvent::SyncComplete(_) => "sync-complete",
            SyncEvent::Online => "online",
            SyncEvent::Offline => "offline",
            SyncEvent::Realtime(_) => "realtime",
            SyncEvent::Conflict(_) => "conflict",
            SyncEvent::Evicted { .. } => "evicted",
        }
    }
}

/// Receives lifecycle events.
///
/// Observers are called synchronously on the publishing task and should
/// return quickly.
pub trait StatusObserver: Send + Sync {
    /// Handles one event.
    fn on_event(&self, event: &SyncEvent);
}

impl<F> StatusObserver for F
where
    F: Fn(&SyncEvent) + Send + Sync,
{
    fn on_event(&self, event: &SyncEvent) {
        self(event)
    }
}

type Observers = RwLock<Vec<(u64, Arc<dyn StatusObserver>)>>;

/// Fans events out to registered observers in registration order.
///
/// A panicking observer is logged and skipped; the rest still run.
#[derive(Default)]
pub struct StatusPublisher {
    observers: Arc<Observers>,
    next_id: AtomicU64,
}

impl StatusPublisher {
    /// Creates a publisher with no observers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer.
    pub fn subscribe(&self, observer: Arc<dyn StatusObserver>) -> ObserverHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.observers.write().push((id, observer));
        ObserverHandle {
            id,
            observers: Arc::downgrade(&self.observers),
        }
    }

    /// Delivers `event` to every observer.
    pub fn publish(&self, event: &SyncEvent) {
        let observers: Vec<_> = self
            .observers
            .read()
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();

        for observer in observers {
            let result = catch_unwind(AssertUnwindSafe(|| observer.on_event(event)));
            if result.is_err() {
                tracing::warn!(event = event.name(), "status observer panicked");
            }
        }
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }
}

/// Registration returned by [`StatusPublisher::subscribe`].
///
/// Dropping the handle keeps the observer registered; call
/// [`ObserverHandle::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct ObserverHandle {
    id: u64,
    observers: Weak<Observers>,
}

impl ObserverHandle {
    /// Removes the observer. A no-op if the publisher is gone.
    pub fn unsubscribe(self) {
        if let Some(observers) = self.observers.upgrade() {
            observers.write().retain(|(id, _)| *id != self.id);
        }
    }
}
