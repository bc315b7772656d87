//! Realtime change listener.

use crate::engine::SyncEngine;
use crate::transport::PushChannel;
use ebbsync_protocol::{Filters, Scalar};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Merges server-pushed changes into the engine's cache.
///
/// One task per monitored resource drains its subscription. The listener
/// runs independently of flushes; the last change applied for an id wins.
pub struct RealtimeListener {
    engine: Arc<SyncEngine>,
    channel: Arc<dyn PushChannel>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RealtimeListener {
    /// Creates a stopped listener.
    pub fn new(engine: Arc<SyncEngine>, channel: Arc<dyn PushChannel>) -> Self {
        Self {
            engine,
            channel,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Subscribes to every monitored resource, scoped to the current
    /// identity, and returns the number of live subscriptions.
    ///
    /// Restarting drops the previous subscriptions first. Without an
    /// identity nothing is subscribed. A refused subscription is logged and
    /// skipped.
    pub async fn start(&self) -> usize {
        self.stop();

        let Some(identity) = self.engine.identity() else {
            debug!("no identity, realtime subscriptions skipped");
            return 0;
        };

        let mut handles = Vec::new();
        for resource in self.engine.cache().resources() {
            let filter = Filters::from([(
                resource.owner_column.clone(),
                Scalar::from(identity.as_str()),
            )]);
            let mut stream = match self.channel.subscribe(&resource.table, &filter).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(table = %resource.table, error = %e, "realtime subscription failed");
                    continue;
                }
            };

            let engine = Arc::clone(&self.engine);
            let table = resource.table.clone();
            handles.push(tokio::spawn(async move {
                while let Some(event) = stream.recv().await {
                    engine.apply_remote_change(event);
                }
                debug!(table = %table, "realtime subscription closed");
            }));
        }

        let count = handles.len();
        *self.tasks.lock() = handles;
        info!(count, "realtime subscriptions started");
        count
    }

    /// Aborts every subscription.
    pub fn stop(&self) {
        let handles = std::mem::take(&mut *self.tasks.lock());
        for handle in &handles {
            handle.abort();
        }
        if !handles.is_empty() {
            debug!(count = handles.len(), "realtime subscriptions stopped");
        }
    }

    /// Number of subscriptions still receiving.
    pub fn active_subscriptions(&self) -> usize {
        self.tasks
            .lock()
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }
}

impl Drop for RealtimeListener {
    fn drop(&mut self) {
        self.stop();
    }
}
