//! The sync engine.

use crate::cache::LocalCache;
use crate::config::{ResourceKind, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::executor::RemoteExecutor;
use crate::memory::StaticIdentity;
use crate::network::{NetworkMonitor, NetworkTransition};
use crate::publisher::{ObserverHandle, StatusObserver, StatusPublisher, SyncEvent};
use crate::queue::{Enqueued, MutationQueue};
use crate::state::{EngineStatus, SaveOutcome, SyncReport, SyncStats, SyncStatus};
use crate::transport::{Clock, Identity, IdentityProvider, RemoteStore, SystemClock};
use ebbsync_protocol::{
    ChangeEvent, Conflict, ConflictPolicy, ConflictResolution, Filters, Operation, QueueItem,
    Record, Scalar,
};
use ebbsync_storage::{InMemoryStore, LocalStore};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Offline-first sync engine.
///
/// The engine owns the mutation queue and the local cache. Writes are
/// queued durably with [`SyncEngine::enqueue`] (or [`SyncEngine::save`])
/// and replayed against the remote store by [`SyncEngine::sync`]. At most
/// one flush runs at a time; a concurrent call returns an empty report.
///
/// The engine does no scheduling of its own. Pair it with a
/// [`crate::SyncDriver`] for the periodic timer and retry delays, and with
/// a [`crate::RealtimeListener`] for server-pushed changes.
///
/// # Example
///
/// ```
/// use ebbsync_engine::{MemoryRemote, Resource, SyncConfig, SyncEngine};
/// use ebbsync_protocol::Operation;
/// use std::sync::Arc;
///
/// # tokio_test_block(async {
/// let engine = SyncEngine::builder(SyncConfig::new().with_resource(Resource::collection("agents")))
///     .with_remote(Arc::new(MemoryRemote::new()))
///     .build()
///     .unwrap();
///
/// let data = serde_json::from_str(r#"{"id": 1, "name": "scout"}"#).unwrap();
/// engine.enqueue(Operation::insert("agents", data).unwrap());
///
/// let report = engine.sync().await;
/// assert_eq!(report.processed, 1);
/// assert_eq!(engine.status().queue_length, 0);
/// # });
/// # fn tokio_test_block(f: impl std::future::Future<Output = ()>) {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
pub struct SyncEngine {
    config: SyncConfig,
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    queue: MutationQueue,
    cache: LocalCache,
    executor: RemoteExecutor,
    network: NetworkMonitor,
    publisher: StatusPublisher,
    syncing: AtomicBool,
    status: RwLock<SyncStatus>,
    last_sync: RwLock<Option<u64>>,
    stats: RwLock<SyncStats>,
    flush_requests: Notify,
}

impl SyncEngine {
    /// Starts building an engine with `config`.
    pub fn builder(config: SyncConfig) -> SyncEngineBuilder {
        SyncEngineBuilder::new(config)
    }

    /// Appends `operation` to the queue and returns the new item id.
    ///
    /// Never touches the network. When online, a flush is requested from
    /// the driver.
    pub fn enqueue(&self, operation: Operation) -> String {
        let Enqueued { item, evicted } = self.queue.enqueue(operation);
        self.note_evictions(&evicted);

        debug!(item = %item.id, table = %item.table(), kind = %item.operation.kind(), "queued");
        self.publisher.publish(&SyncEvent::Queued {
            item_id: item.id.clone(),
            table: item.table().to_string(),
        });

        if self.network.is_online() {
            self.request_flush();
        }
        item.id
    }

    /// Replays the queue against the remote store, then pulls snapshots of
    /// the monitored resources.
    ///
    /// Returns an empty report without side effects when offline or when
    /// another flush is running. Failed items are retried on later flushes
    /// until they have been attempted `retry_attempts` times. If the future
    /// is dropped mid-flight, every item it had not settled goes back to
    /// the queue.
    pub async fn sync(&self) -> SyncReport {
        if !self.network.is_online() {
            debug!("offline, flush skipped");
            return SyncReport::default();
        }
        let Some(guard) = FlushGuard::acquire(self) else {
            debug!("flush already running");
            return SyncReport::default();
        };

        self.set_status(SyncStatus::Syncing);
        self.publisher.publish(&SyncEvent::SyncStart);

        let mut flight = InFlight::new(&self.queue, self.queue.drain_all());
        if !flight.pending.is_empty() {
            info!(items = flight.pending.len(), "flushing queue");
        }

        let mut report = SyncReport::default();
        let mut dispatched = 0;
        while dispatched < self.config.batch_size {
            if !self.network.is_online() {
                info!("went offline, stopping flush");
                break;
            }
            let outcome = match flight.begin() {
                Some(item) => self.executor.execute(&item.operation).await,
                None => break,
            };
            let Some(mut item) = flight.finish() else {
                break;
            };
            dispatched += 1;

            match outcome {
                Ok(_) => {
                    report.processed += 1;
                    self.queue.complete(&item.id);
                    debug!(item = %item.id, table = %item.table(), kind = %item.operation.kind(), "synced");
                }
                Err(err) => {
                    self.stats.write().last_error = Some(err.message.clone());
                    let exhausted = item.attempts + 1 >= self.config.retry_attempts;
                    let skip_retries = err.is_permanent() && self.config.drop_permanent_failures;
                    if exhausted || skip_retries {
                        report.failed += 1;
                        self.queue.complete(&item.id);
                        warn!(
                            item = %item.id,
                            table = %item.table(),
                            attempts = item.attempts + 1,
                            error = %err,
                            "dropping item"
                        );
                    } else {
                        item.attempts += 1;
                        self.queue.record_attempt(&item);
                        debug!(item = %item.id, attempts = item.attempts, error = %err, "will retry");
                        flight.retry(item);
                    }
                }
            }
        }

        let settled = flight.settle();
        report.requeued = settled.requeued;
        report.deferred = settled.deferred;
        report.retry_after = settled
            .min_attempts
            .map(|attempts| self.config.retry_delay_for(attempts));
        self.note_evictions(&settled.evicted);

        self.pull_snapshots().await;

        self.record_last_sync(self.clock.now_millis());
        let status = if !self.network.is_online() {
            SyncStatus::Offline
        } else if report.failed > 0 {
            SyncStatus::Error
        } else {
            SyncStatus::Idle
        };
        self.set_status(status);
        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.items_processed += report.processed as u64;
            stats.items_failed += report.failed as u64;
            stats.retries_scheduled += report.requeued as u64;
        }
        drop(guard);

        info!(
            processed = report.processed,
            failed = report.failed,
            requeued = report.requeued,
            deferred = report.deferred,
            "flush complete"
        );
        self.publisher
            .publish(&SyncEvent::SyncComplete(report.clone()));
        report
    }

    /// Same as [`SyncEngine::sync`].
    pub async fn force_sync(&self) -> SyncReport {
        self.sync().await
    }

    /// Applies a connectivity signal.
    ///
    /// Going offline sets [`SyncStatus::Offline`]; coming back online sets
    /// [`SyncStatus::Idle`] and requests one flush. Repeated signals are
    /// ignored.
    pub fn set_online(&self, online: bool) -> Option<NetworkTransition> {
        let transition = self.network.set(online)?;
        match transition {
            NetworkTransition::WentOffline => {
                info!("offline, queueing changes");
                self.set_status(SyncStatus::Offline);
                self.publisher.publish(&SyncEvent::Offline);
            }
            NetworkTransition::WentOnline => {
                info!("online, resuming sync");
                self.set_status(SyncStatus::Idle);
                self.publisher.publish(&SyncEvent::Online);
                self.request_flush();
            }
        }
        Some(transition)
    }

    /// Returns true if the remote store is considered reachable.
    pub fn is_online(&self) -> bool {
        self.network.is_online()
    }

    /// Asks the driver for a flush. Requests made before the driver gets to
    /// them are coalesced.
    pub fn request_flush(&self) {
        self.flush_requests.notify_one();
    }

    /// Completes when a flush has been requested.
    pub async fn flush_requested(&self) {
        self.flush_requests.notified().await;
    }

    /// Current status snapshot.
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            is_online: self.network.is_online(),
            is_syncing: self.syncing.load(Ordering::SeqCst),
            status: *self.status.read(),
            queue_length: self.queue.len(),
            last_sync: *self.last_sync.read(),
        }
    }

    /// Registers a lifecycle observer.
    pub fn subscribe(&self, observer: Arc<dyn StatusObserver>) -> ObserverHandle {
        self.publisher.subscribe(observer)
    }

    /// Discards every queued item and returns how many there were.
    pub fn clear_queue(&self) -> usize {
        let cleared = self.queue.clear();
        info!(cleared, "queue cleared");
        cleared
    }

    /// Saves a record of a monitored resource.
    ///
    /// Without an identity only the local cache is written. Otherwise the
    /// record is stamped with the owner column, written to the cache, and
    /// either sent directly (when online) or queued. A failed direct write
    /// is queued too.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownResource`] if `table` is not monitored.
    pub async fn save(&self, table: &str, mut record: Record) -> SyncResult<SaveOutcome> {
        let resource = self
            .cache
            .resource(table)
            .cloned()
            .ok_or_else(|| SyncError::UnknownResource(table.to_string()))?;

        let Some(identity) = self.identity.current_identity() else {
            self.write_local(&resource.cache_key, self.cache.merge_record(&resource, &record));
            return Ok(SaveOutcome::LocalOnly);
        };

        record.insert(
            resource.owner_column.clone(),
            Value::String(identity.as_str().to_string()),
        );
        self.write_local(&resource.cache_key, self.cache.merge_record(&resource, &record));

        let operation = match resource.kind {
            ResourceKind::Singleton => {
                Operation::upsert_on(table, record, resource.owner_column.clone())?
            }
            ResourceKind::Collection => Operation::upsert(table, record)?,
        };

        if !self.network.is_online() {
            let item_id = self.enqueue(operation);
            return Ok(SaveOutcome::Queued {
                item_id,
                error: None,
            });
        }

        match self.executor.execute(&operation).await {
            Ok(_) => {
                debug!(table, "saved");
                Ok(SaveOutcome::Synced)
            }
            Err(err) => {
                warn!(table, error = %err, "direct save failed, queueing");
                let item_id = self.enqueue(operation);
                Ok(SaveOutcome::Queued {
                    item_id,
                    error: Some(err.message),
                })
            }
        }
    }

    /// Settles a conflict reported under [`ConflictPolicy::Manual`].
    ///
    /// `TakeServer` writes the server snapshot to the cache and removes the
    /// conflicting items still in the queue. `KeepLocal` leaves both alone.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownResource`] for an unmonitored cache key,
    /// or the storage error if the cache write fails.
    pub fn resolve_conflict(
        &self,
        conflict: &Conflict,
        resolution: ConflictResolution,
    ) -> SyncResult<()> {
        if self.cache.resource_by_key(&conflict.cache_key).is_none() {
            return Err(SyncError::UnknownResource(conflict.cache_key.clone()));
        }
        match resolution {
            ConflictResolution::KeepLocal => {
                info!(table = %conflict.table, "conflict resolved, keeping local copy");
            }
            ConflictResolution::TakeServer => {
                self.cache.replace(&conflict.cache_key, &conflict.server)?;
                let removed = self.queue.remove(&conflict.pending_items);
                info!(table = %conflict.table, removed, "conflict resolved, took server copy");
            }
        }
        Ok(())
    }

    /// Merges a server-pushed change into the cache and publishes it.
    ///
    /// Changes of unmonitored tables are published without being cached.
    pub fn apply_remote_change(&self, event: ChangeEvent) {
        debug!(table = %event.table, event = ?event.event_type, "realtime change");
        if let Some(resource) = self.cache.resource(&event.table) {
            if let Err(e) = self.cache.apply_change(resource, &event) {
                warn!(table = %event.table, error = %e, "cannot apply realtime change");
            }
        }
        self.publisher.publish(&SyncEvent::Realtime(event));
    }

    /// Statistics since construction.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Copy of the queued items in FIFO order.
    pub fn pending(&self) -> Vec<QueueItem> {
        self.queue.snapshot()
    }

    /// The signed-in identity, if any.
    pub fn identity(&self) -> Option<Identity> {
        self.identity.current_identity()
    }

    /// The engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The local cache.
    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    /// The mutation queue.
    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    async fn pull_snapshots(&self) {
        let Some(identity) = self.identity.current_identity() else {
            debug!("no identity, pull skipped");
            return;
        };

        for resource in self.cache.resources() {
            if !self.network.is_online() {
                debug!("offline, pull stopped");
                return;
            }
            let filters = Filters::from([(
                resource.owner_column.clone(),
                Scalar::from(identity.as_str()),
            )]);
            let rows = match self.remote.select(&resource.table, &filters).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(table = %resource.table, error = %e, "pull failed");
                    self.stats.write().last_error = Some(e.to_string());
                    continue;
                }
            };

            let snapshot = match resource.kind {
                ResourceKind::Singleton => match rows.into_iter().next() {
                    Some(row) => Value::Object(row),
                    None => continue,
                },
                ResourceKind::Collection => {
                    Value::Array(rows.into_iter().map(Value::Object).collect())
                }
            };

            let pending = self.queue.pending_for(&resource.table);
            if !pending.is_empty() {
                match self.config.conflict_policy {
                    ConflictPolicy::ServerWins => {}
                    ConflictPolicy::ClientWins => {
                        debug!(table = %resource.table, pending = pending.len(), "pending writes, keeping local copy");
                        continue;
                    }
                    ConflictPolicy::Manual => {
                        let local = self.cache.read(&resource.cache_key).unwrap_or_else(|e| {
                            warn!(key = %resource.cache_key, error = %e, "cannot read local copy");
                            None
                        });
                        info!(table = %resource.table, pending = pending.len(), "conflict reported");
                        self.stats.write().conflicts_reported += 1;
                        self.publisher.publish(&SyncEvent::Conflict(Conflict {
                            table: resource.table.clone(),
                            cache_key: resource.cache_key.clone(),
                            pending_items: pending,
                            server: snapshot,
                            local,
                        }));
                        continue;
                    }
                }
            }

            self.write_local(
                &resource.cache_key,
                self.cache.replace(&resource.cache_key, &snapshot),
            );
        }
    }

    fn write_local(&self, key: &str, result: SyncResult<()>) {
        if let Err(e) = result {
            warn!(key, error = %e, "cannot write local cache");
        }
    }

    fn note_evictions(&self, evicted: &[QueueItem]) {
        if evicted.is_empty() {
            return;
        }
        self.stats.write().items_evicted += evicted.len() as u64;
        for item in evicted {
            self.publisher.publish(&SyncEvent::Evicted {
                item_id: item.id.clone(),
                table: item.table().to_string(),
            });
        }
    }

    fn record_last_sync(&self, now: u64) {
        *self.last_sync.write() = Some(now);
        if let Err(e) = self.store.set(&self.config.last_sync_key, &now.to_string()) {
            warn!(error = %e, "cannot persist last sync time");
        }
    }

    fn set_status(&self, status: SyncStatus) {
        *self.status.write() = status;
    }
}

/// Single-flight guard. Releasing it resets a `Syncing` status left behind
/// by a flush that did not finish.
struct FlushGuard<'a> {
    engine: &'a SyncEngine,
}

impl<'a> FlushGuard<'a> {
    fn acquire(engine: &'a SyncEngine) -> Option<Self> {
        engine
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { engine })
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        {
            let mut status = self.engine.status.write();
            if *status == SyncStatus::Syncing {
                *status = if self.engine.network.is_online() {
                    SyncStatus::Idle
                } else {
                    SyncStatus::Offline
                };
            }
        }
        self.engine.syncing.store(false, Ordering::SeqCst);
    }
}

/// Items drained by a running flush.
///
/// Dropped without [`InFlight::settle`], it returns every unsettled item to
/// the queue with its attempts unchanged.
struct InFlight<'a> {
    queue: &'a MutationQueue,
    pending: VecDeque<QueueItem>,
    current: Option<QueueItem>,
    retried: Vec<QueueItem>,
    settled: bool,
}

struct Settled {
    requeued: usize,
    deferred: usize,
    min_attempts: Option<u32>,
    evicted: Vec<QueueItem>,
}

impl<'a> InFlight<'a> {
    fn new(queue: &'a MutationQueue, items: Vec<QueueItem>) -> Self {
        Self {
            queue,
            pending: items.into(),
            current: None,
            retried: Vec::new(),
            settled: false,
        }
    }

    fn begin(&mut self) -> Option<&QueueItem> {
        self.current = self.pending.pop_front();
        self.current.as_ref()
    }

    fn finish(&mut self) -> Option<QueueItem> {
        self.current.take()
    }

    fn retry(&mut self, item: QueueItem) {
        self.retried.push(item);
    }

    fn settle(mut self) -> Settled {
        self.settled = true;
        let retried = std::mem::take(&mut self.retried);
        let deferred: Vec<QueueItem> = self.pending.drain(..).collect();

        let requeued = retried.len();
        let min_attempts = retried.iter().map(|item| item.attempts).min();
        let deferred_count = deferred.len();

        let mut items = retried;
        items.extend(deferred);
        let evicted = self.queue.requeue(items);

        Settled {
            requeued,
            deferred: deferred_count,
            min_attempts,
            evicted,
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut items = std::mem::take(&mut self.retried);
        items.extend(self.current.take());
        items.extend(self.pending.drain(..));
        if !items.is_empty() {
            warn!(items = items.len(), "flush interrupted, returning items to the queue");
            self.queue.requeue(items);
        }
    }
}

/// Builder for [`SyncEngine`].
pub struct SyncEngineBuilder {
    config: SyncConfig,
    remote: Option<Arc<dyn RemoteStore>>,
    store: Option<Arc<dyn LocalStore>>,
    identity: Option<Arc<dyn IdentityProvider>>,
    clock: Option<Arc<dyn Clock>>,
    online: bool,
}

impl SyncEngineBuilder {
    /// Creates a builder with `config`.
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            remote: None,
            store: None,
            identity: None,
            clock: None,
            online: true,
        }
    }

    /// Sets the remote store client. Required.
    pub fn with_remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Sets the local store. Defaults to an [`InMemoryStore`].
    pub fn with_local_store(mut self, store: Arc<dyn LocalStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the identity provider. Defaults to signed out.
    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Sets the clock. Defaults to [`SystemClock`].
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the initial connectivity. Defaults to online.
    pub fn with_online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    /// Builds the engine, restoring the persisted queue and last sync time.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the configuration is invalid or no
    /// remote store was set.
    pub fn build(self) -> SyncResult<SyncEngine> {
        self.config.validate()?;
        let remote = self
            .remote
            .ok_or_else(|| SyncError::Config("a remote store is required".into()))?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        let identity = self
            .identity
            .unwrap_or_else(|| Arc::new(StaticIdentity::anonymous()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let queue = MutationQueue::open(
            Arc::clone(&store),
            self.config.queue_key.clone(),
            self.config.queue_capacity,
            Arc::clone(&clock),
        );
        let cache = LocalCache::new(Arc::clone(&store), self.config.resources.clone());
        let last_sync = load_last_sync(store.as_ref(), &self.config.last_sync_key);
        let status = if self.online {
            SyncStatus::Idle
        } else {
            SyncStatus::Offline
        };

        info!(
            queued = queue.len(),
            resources = self.config.resources.len(),
            policy = %self.config.conflict_policy,
            "sync engine ready"
        );

        Ok(SyncEngine {
            executor: RemoteExecutor::new(Arc::clone(&remote)),
            network: NetworkMonitor::new(self.online),
            publisher: StatusPublisher::new(),
            syncing: AtomicBool::new(false),
            status: RwLock::new(status),
            last_sync: RwLock::new(last_sync),
            stats: RwLock::new(SyncStats::default()),
            flush_requests: Notify::new(),
            config: self.config,
            store,
            remote,
            identity,
            clock,
            queue,
            cache,
        })
    }
}

fn load_last_sync(store: &dyn LocalStore, key: &str) -> Option<u64> {
    match store.get(key) {
        Ok(Some(raw)) => match raw.trim().parse() {
            Ok(millis) => Some(millis),
            Err(_) => {
                warn!(key, "ignoring unreadable last sync time");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!(key, error = %e, "cannot read last sync time");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Resource;
    use crate::error::RemoteError;
    use crate::memory::{ManualClock, MemoryRemote};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    fn record(value: Value) -> Record {
        serde_json::from_value(value).unwrap()
    }

    fn insert(id: i64) -> Operation {
        Operation::insert("agents", record(json!({"id": id, "user_id": "u1"}))).unwrap()
    }

    struct Harness {
        engine: SyncEngine,
        remote: Arc<MemoryRemote>,
        store: Arc<InMemoryStore>,
        identity: Arc<StaticIdentity>,
    }

    fn harness(config: SyncConfig) -> Harness {
        let remote = Arc::new(MemoryRemote::new());
        let store = Arc::new(InMemoryStore::new());
        let identity = Arc::new(StaticIdentity::signed_in("u1"));
        let engine = SyncEngine::builder(config)
            .with_remote(remote.clone())
            .with_local_store(store.clone())
            .with_identity(identity.clone())
            .with_clock(Arc::new(ManualClock::new(42_000)))
            .build()
            .unwrap();
        Harness {
            engine,
            remote,
            store,
            identity,
        }
    }

    fn config() -> SyncConfig {
        SyncConfig::new()
            .with_resource(Resource::singleton("game_state").with_cache_key("games_state"))
            .with_resource(Resource::collection("agents"))
    }

    fn events(engine: &SyncEngine) -> Arc<Mutex<Vec<SyncEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        engine.subscribe(Arc::new(move |e: &SyncEvent| sink.lock().push(e.clone())));
        seen
    }

    #[test]
    fn build_requires_remote_and_valid_config() {
        assert!(matches!(
            SyncEngine::builder(SyncConfig::new()).build(),
            Err(SyncError::Config(_))
        ));
        let result = SyncEngine::builder(SyncConfig::new().with_batch_size(0))
            .with_remote(Arc::new(MemoryRemote::new()))
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn sync_replays_queue_and_records_last_sync() {
        let h = harness(config());
        let seen = events(&h.engine);
        h.engine.enqueue(insert(1));
        h.engine.enqueue(insert(2));

        let report = h.engine.sync().await;
        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 0);

        let status = h.engine.status();
        assert_eq!(status.queue_length, 0);
        assert_eq!(status.status, SyncStatus::Idle);
        assert_eq!(status.last_sync, Some(42_000));
        assert_eq!(h.store.get("ebbsync_last_sync").unwrap().as_deref(), Some("42000"));

        let names: Vec<_> = seen.lock().iter().map(|e| e.name()).collect();
        assert_eq!(
            names,
            vec!["queued", "queued", "sync-start", "sync-complete"]
        );
    }

    #[tokio::test]
    async fn offline_sync_has_no_side_effects() {
        let h = harness(config());
        h.engine.set_online(false);
        let seen = events(&h.engine);
        h.engine.enqueue(insert(1));

        assert_eq!(h.engine.sync().await, SyncReport::default());
        assert_eq!(h.engine.status().queue_length, 1);
        assert_eq!(h.engine.status().status, SyncStatus::Offline);
        assert!(h.remote.calls().is_empty());
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn retry_ceiling_drops_after_three_attempts() {
        let h = harness(config());
        h.remote.fail_table("agents", RemoteError::Timeout);
        h.engine.enqueue(insert(1));

        let first = h.engine.sync().await;
        assert_eq!((first.processed, first.failed, first.requeued), (0, 0, 1));
        assert_eq!(h.engine.pending()[0].attempts, 1);
        assert_eq!(first.retry_after, Some(Duration::from_secs(1)));

        let second = h.engine.sync().await;
        assert_eq!(second.requeued, 1);
        assert_eq!(h.engine.pending()[0].attempts, 2);

        let third = h.engine.sync().await;
        assert_eq!((third.failed, third.requeued), (1, 0));
        assert_eq!(h.engine.status().queue_length, 0);
        assert_eq!(h.engine.status().status, SyncStatus::Error);
        assert_eq!(h.remote.mutations().len(), 3);
        assert!(h.engine.stats().last_error.is_some());
    }

    #[tokio::test]
    async fn permanent_failures_can_skip_retries() {
        let h = harness(config().with_drop_permanent_failures(true));
        h.remote.fail_next(RemoteError::Rejected("bad row".into()));
        h.engine.enqueue(insert(1));

        let report = h.engine.sync().await;
        assert_eq!(report.failed, 1);
        assert_eq!(h.engine.status().queue_length, 0);
    }

    #[tokio::test]
    async fn batch_size_defers_the_rest() {
        let h = harness(config().with_batch_size(2));
        for id in 1..=5 {
            h.engine.enqueue(insert(id));
        }
        let report = h.engine.sync().await;
        assert_eq!((report.processed, report.deferred), (2, 3));
        let ids: Vec<_> = h
            .engine
            .pending()
            .iter()
            .map(|i| i.operation.data().unwrap()["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![3, 4, 5]);
        assert!(h.engine.pending().iter().all(|i| i.attempts == 0));
    }

    #[tokio::test]
    async fn concurrent_sync_is_single_flight() {
        let h = harness(config());
        h.remote.set_latency(Duration::from_millis(50));
        h.engine.enqueue(insert(1));

        let (first, second) = tokio::join!(h.engine.sync(), h.engine.sync());
        assert_eq!(first.processed, 1);
        assert_eq!(second, SyncReport::default());
        assert!(!h.engine.status().is_syncing);
    }

    #[tokio::test]
    async fn dropped_flush_returns_items() {
        let h = harness(config());
        h.remote.set_latency(Duration::from_secs(5));
        h.engine.enqueue(insert(1));
        h.engine.enqueue(insert(2));

        let result = tokio::time::timeout(Duration::from_millis(20), h.engine.sync()).await;
        assert!(result.is_err());

        let status = h.engine.status();
        assert!(!status.is_syncing);
        assert_eq!(status.status, SyncStatus::Idle);
        assert_eq!(status.queue_length, 2);
        assert!(h.engine.pending().iter().all(|i| i.attempts == 0));
    }

    #[tokio::test]
    async fn pull_overwrites_cache() {
        let h = harness(config());
        h.remote.seed(
            "game_state",
            vec![record(json!({"user_id": "u1", "xp": 10})), record(json!({"user_id": "u2", "xp": 99}))],
        );
        h.remote.seed("agents", vec![record(json!({"id": 5, "user_id": "u1"}))]);

        h.engine.sync().await;
        let game = h.engine.cache().read("games_state").unwrap().unwrap();
        assert_eq!(game["xp"], 10);
        assert_eq!(h.engine.cache().collection("agents").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pull_without_row_keeps_singleton() {
        let h = harness(config());
        h.engine
            .cache()
            .replace("games_state", &json!({"user_id": "u1", "xp": 3}))
            .unwrap();
        h.engine.sync().await;
        assert_eq!(h.engine.cache().read("games_state").unwrap().unwrap()["xp"], 3);
    }

    #[tokio::test]
    async fn pull_skipped_without_identity() {
        let h = harness(config());
        h.identity.sign_out();
        h.engine.sync().await;
        assert!(h.remote.calls().is_empty());
    }

    #[tokio::test]
    async fn client_wins_keeps_local_copy_while_pending() {
        let h = harness(config().with_conflict_policy(ConflictPolicy::ClientWins));
        h.remote.fail_table("agents", RemoteError::Timeout);
        h.remote.seed("agents", vec![record(json!({"id": 1, "user_id": "u1", "lvl": 9}))]);
        h.engine
            .cache()
            .replace("agents", &json!([{"id": 1, "user_id": "u1", "lvl": 2}]))
            .unwrap();
        h.engine.enqueue(insert(1));

        h.engine.sync().await;
        // The select on agents fails too, so heal before the next flush.
        h.remote.heal();
        h.remote.fail_next(RemoteError::Timeout);
        h.engine.sync().await;

        assert_eq!(h.engine.status().queue_length, 1);
        assert_eq!(h.engine.cache().collection("agents").unwrap()[0]["lvl"], 2);
    }

    #[tokio::test]
    async fn manual_policy_reports_conflict() {
        let h = harness(config().with_conflict_policy(ConflictPolicy::Manual));
        let seen = events(&h.engine);
        h.engine.set_online(false);
        let item = h.engine.enqueue(
            Operation::upsert_on("game_state", record(json!({"user_id": "u1", "xp": 1})), "user_id")
                .unwrap(),
        );
        h.remote.seed("game_state", vec![record(json!({"user_id": "u1", "xp": 50}))]);
        h.engine.set_online(true);

        h.remote.fail_next(RemoteError::Timeout);
        h.engine.sync().await;

        let conflict = seen
            .lock()
            .iter()
            .find_map(|e| match e {
                SyncEvent::Conflict(c) => Some(c.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(conflict.pending_items, vec![item]);
        assert_eq!(conflict.server["xp"], 50);
        assert!(h.engine.cache().read("games_state").unwrap().is_none());
        assert_eq!(h.engine.stats().conflicts_reported, 1);

        h.engine
            .resolve_conflict(&conflict, ConflictResolution::TakeServer)
            .unwrap();
        assert_eq!(h.engine.cache().read("games_state").unwrap().unwrap()["xp"], 50);
        assert_eq!(h.engine.status().queue_length, 0);
    }

    #[tokio::test]
    async fn save_paths() {
        let h = harness(config());

        let outcome = h.engine.save("game_state", record(json!({"xp": 1}))).await.unwrap();
        assert_eq!(outcome, SaveOutcome::Synced);
        assert_eq!(h.remote.rows("game_state")[0]["user_id"], "u1");
        assert_eq!(h.engine.cache().read("games_state").unwrap().unwrap()["xp"], 1);

        h.remote.fail_next(RemoteError::Network("reset".into()));
        let outcome = h.engine.save("game_state", record(json!({"xp": 2}))).await.unwrap();
        assert!(matches!(outcome, SaveOutcome::Queued { error: Some(_), .. }));

        h.engine.set_online(false);
        let outcome = h.engine.save("agents", record(json!({"id": 3}))).await.unwrap();
        assert!(matches!(outcome, SaveOutcome::Queued { error: None, .. }));
        assert_eq!(h.engine.status().queue_length, 2);

        h.identity.sign_out();
        let outcome = h.engine.save("agents", record(json!({"id": 4}))).await.unwrap();
        assert_eq!(outcome, SaveOutcome::LocalOnly);
        assert_eq!(h.engine.status().queue_length, 2);
        assert_eq!(h.engine.cache().collection("agents").unwrap().len(), 2);

        assert!(matches!(
            h.engine.save("ghosts", Record::new()).await,
            Err(SyncError::UnknownResource(_))
        ));
    }

    #[tokio::test]
    async fn online_transition_requests_one_flush() {
        let h = harness(config());
        assert_eq!(h.engine.set_online(true), None);
        assert_eq!(h.engine.set_online(false), Some(NetworkTransition::WentOffline));
        assert_eq!(h.engine.set_online(true), Some(NetworkTransition::WentOnline));
        assert_eq!(h.engine.status().status, SyncStatus::Idle);

        tokio::time::timeout(Duration::from_millis(100), h.engine.flush_requested())
            .await
            .unwrap();
    }

    #[test]
    fn realtime_change_updates_cache_and_publishes() {
        let h = harness(config());
        let seen = events(&h.engine);
        h.engine
            .cache()
            .replace("agents", &json!([{"id": 5}, {"id": 6}]))
            .unwrap();

        h.engine
            .apply_remote_change(ChangeEvent::delete("agents", record(json!({"id": 5}))));
        h.engine
            .apply_remote_change(ChangeEvent::insert("challenges", record(json!({"id": 1}))));

        let rows = h.engine.cache().collection("agents").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], 6);
        assert!(h.store.get("challenges").unwrap().is_none());
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn last_sync_survives_restart() {
        let store = Arc::new(InMemoryStore::new());
        store.set("ebbsync_last_sync", "1234").unwrap();
        let engine = SyncEngine::builder(SyncConfig::new())
            .with_remote(Arc::new(MemoryRemote::new()))
            .with_local_store(store)
            .with_online(false)
            .build()
            .unwrap();
        assert_eq!(engine.status().last_sync, Some(1234));
        assert_eq!(engine.status().status, SyncStatus::Offline);
    }
}
