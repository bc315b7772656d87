//! Event recording observer.

use ebbsync_engine::{StatusObserver, SyncEngine, SyncEvent, SyncReport};
use ebbsync_protocol::{ChangeEvent, Conflict};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Records every event an engine publishes.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Mutex<Vec<SyncEvent>>,
}

impl EventRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a recorder subscribed to `engine`.
    pub fn attach(engine: &SyncEngine) -> Arc<Self> {
        let recorder = Arc::new(Self::new());
        engine.subscribe(recorder.clone());
        recorder
    }

    /// All events so far.
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().clone()
    }

    /// Names of all events so far.
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(SyncEvent::name).collect()
    }

    /// Number of events named `name`.
    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }

    /// Reports of every completed flush.
    pub fn completions(&self) -> Vec<SyncReport> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SyncEvent::SyncComplete(report) => Some(report.clone()),
                _ => None,
            })
            .collect()
    }

    /// Every reported conflict.
    pub fn conflicts(&self) -> Vec<Conflict> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SyncEvent::Conflict(conflict) => Some(conflict.clone()),
                _ => None,
            })
            .collect()
    }

    /// Every realtime change received.
    pub fn realtime(&self) -> Vec<ChangeEvent> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SyncEvent::Realtime(change) => Some(change.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forgets every recorded event.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Waits until at least `count` events named `name` were recorded.
    ///
    /// Returns false on timeout.
    pub async fn wait_for(&self, name: &str, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.count(name) >= count {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

impl StatusObserver for EventRecorder {
    fn on_event(&self, event: &SyncEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_in_order() {
        let recorder = EventRecorder::new();
        recorder.on_event(&SyncEvent::Offline);
        recorder.on_event(&SyncEvent::Online);
        recorder.on_event(&SyncEvent::SyncComplete(SyncReport::default()));

        assert_eq!(recorder.names(), vec!["offline", "online", "sync-complete"]);
        assert_eq!(recorder.count("online"), 1);
        assert_eq!(recorder.completions().len(), 1);

        recorder.clear();
        assert!(recorder.events().is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let recorder = EventRecorder::new();
        assert!(!recorder.wait_for("online", 1, Duration::from_millis(10)).await);
        recorder.on_event(&SyncEvent::Online);
        assert!(recorder.wait_for("online", 1, Duration::from_millis(10)).await);
    }
}
