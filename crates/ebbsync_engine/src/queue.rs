//! Durable, bounded FIFO of pending writes.

use crate::transport::Clock;
use ebbsync_protocol::{decode_queue, encode_queue, Operation, QueueItem};
use ebbsync_storage::LocalStore;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Result of an enqueue.
#[derive(Debug, Clone)]
pub struct Enqueued {
    /// The appended item.
    pub item: QueueItem,
    /// Items evicted to make room, oldest first.
    pub evicted: Vec<QueueItem>,
}

#[derive(Default)]
struct Entries {
    /// Waiting for the next flush.
    queued: VecDeque<QueueItem>,
    /// Handed to a running flush and not yet settled.
    in_flight: Vec<QueueItem>,
}

/// The mutation queue.
///
/// Every change is written through to the local store under the queue
/// lock. The stored copy holds the in-flight items followed by the queued
/// ones, so an item leaves storage only once a flush has settled it and a
/// crash mid-flush loses nothing.
///
/// A failed write is logged and retried on the next change. A blob found
/// at open that cannot be decoded is never overwritten; the queue then
/// keeps working in memory only.
pub struct MutationQueue {
    entries: Mutex<Entries>,
    store: Arc<dyn LocalStore>,
    key: String,
    capacity: usize,
    clock: Arc<dyn Clock>,
    detached: bool,
    persistent: AtomicBool,
}

impl MutationQueue {
    /// Opens the queue persisted under `key`, restoring its items.
    ///
    /// Restored items beyond `capacity` are trimmed, oldest first; see
    /// [`MutationQueue::stored_len`] to check for that beforehand.
    pub fn open(
        store: Arc<dyn LocalStore>,
        key: impl Into<String>,
        capacity: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let key = key.into();
        let (mut queued, detached) = match Self::load(store.as_ref(), &key) {
            Ok(items) => (VecDeque::from(items), false),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "persisted queue is unreadable, continuing in memory");
                (VecDeque::new(), true)
            }
        };

        let capacity = capacity.max(1);
        let mut trimmed = 0;
        while queued.len() > capacity {
            queued.pop_front();
            trimmed += 1;
        }
        if trimmed > 0 {
            tracing::warn!(trimmed, capacity, "restored queue exceeded capacity");
        }
        if !queued.is_empty() {
            tracing::debug!(count = queued.len(), "restored queued items");
        }

        let queue = Self {
            entries: Mutex::new(Entries {
                queued,
                in_flight: Vec::new(),
            }),
            store,
            key,
            capacity,
            clock,
            detached,
            persistent: AtomicBool::new(!detached),
        };
        if trimmed > 0 {
            let entries = queue.entries.lock();
            queue.persist(&entries);
        }
        queue
    }

    /// Number of items in the stored copy under `key`, without opening it.
    ///
    /// # Errors
    ///
    /// Returns the read or decode failure as text.
    pub fn stored_len(store: &dyn LocalStore, key: &str) -> Result<usize, String> {
        Self::load(store, key).map(|items| items.len())
    }

    fn load(store: &dyn LocalStore, key: &str) -> Result<Vec<QueueItem>, String> {
        match store.get(key).map_err(|e| e.to_string())? {
            Some(blob) => decode_queue(&blob).map_err(|e| e.to_string()),
            None => Ok(Vec::new()),
        }
    }

    /// Appends `operation`, evicting the oldest items if the queue is full.
    pub fn enqueue(&self, operation: Operation) -> Enqueued {
        let item = QueueItem::new(
            Uuid::new_v4().to_string(),
            self.clock.now_millis(),
            operation,
        );

        let mut entries = self.entries.lock();
        let mut evicted = Vec::new();
        while entries.queued.len() >= self.capacity {
            if let Some(oldest) = entries.queued.pop_front() {
                evicted.push(oldest);
            }
        }
        entries.queued.push_back(item.clone());
        self.persist(&entries);
        drop(entries);

        for old in &evicted {
            tracing::warn!(item = %old.id, table = %old.table(), "queue full, evicted oldest item");
        }
        Enqueued { item, evicted }
    }

    /// Hands every queued item to a flush, in FIFO order.
    ///
    /// The items stay in the stored copy as in-flight until each one is
    /// passed to [`MutationQueue::complete`], [`MutationQueue::record_attempt`]
    /// followed by [`MutationQueue::requeue`], or [`MutationQueue::requeue`].
    pub fn drain_all(&self) -> Vec<QueueItem> {
        let mut entries = self.entries.lock();
        let drained: Vec<QueueItem> = entries.queued.drain(..).collect();
        entries.in_flight.extend(drained.iter().cloned());
        drained
    }

    /// Removes a settled in-flight item from the stored copy.
    pub fn complete(&self, id: &str) {
        let mut entries = self.entries.lock();
        let before = entries.in_flight.len();
        entries.in_flight.retain(|item| item.id != id);
        if entries.in_flight.len() != before {
            self.persist(&entries);
        }
    }

    /// Stores the attempt count of an in-flight item that will be retried.
    pub fn record_attempt(&self, item: &QueueItem) {
        let mut entries = self.entries.lock();
        let Some(stored) = entries.in_flight.iter_mut().find(|i| i.id == item.id) else {
            return;
        };
        stored.attempts = item.attempts;
        self.persist(&entries);
    }

    /// Puts `returned` back at the front, ahead of anything enqueued since
    /// the drain, keeping their relative order. They stop being in-flight.
    ///
    /// Returns the items evicted if the result would exceed capacity.
    pub fn requeue(&self, returned: Vec<QueueItem>) -> Vec<QueueItem> {
        if returned.is_empty() {
            return Vec::new();
        }
        let mut entries = self.entries.lock();
        entries
            .in_flight
            .retain(|item| !returned.iter().any(|r| r.id == item.id));
        for item in returned.into_iter().rev() {
            entries.queued.push_front(item);
        }
        let mut evicted = Vec::new();
        while entries.queued.len() > self.capacity {
            if let Some(oldest) = entries.queued.pop_front() {
                evicted.push(oldest);
            }
        }
        self.persist(&entries);
        drop(entries);

        for old in &evicted {
            tracing::warn!(item = %old.id, table = %old.table(), "queue full on requeue, evicted oldest item");
        }
        evicted
    }

    /// Number of items waiting for a flush.
    pub fn len(&self) -> usize {
        self.entries.lock().queued.len()
    }

    /// Returns true if nothing is waiting for a flush.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().queued.is_empty()
    }

    /// Number of items held by a running flush.
    pub fn in_flight(&self) -> usize {
        self.entries.lock().in_flight.len()
    }

    /// Maximum number of queued items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy of the items waiting for a flush, in FIFO order.
    pub fn snapshot(&self) -> Vec<QueueItem> {
        self.entries.lock().queued.iter().cloned().collect()
    }

    /// Removes every waiting item and returns how many there were.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.queued.len();
        entries.queued.clear();
        self.persist(&entries);
        count
    }

    /// Removes the waiting items with the given ids and returns how many
    /// were found.
    pub fn remove(&self, ids: &[String]) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.queued.len();
        entries.queued.retain(|item| !ids.contains(&item.id));
        let removed = before - entries.queued.len();
        if removed > 0 {
            self.persist(&entries);
        }
        removed
    }

    /// Ids of the waiting items that target `table`.
    pub fn pending_for(&self, table: &str) -> Vec<String> {
        self.entries
            .lock()
            .queued
            .iter()
            .filter(|item| item.table() == table)
            .map(|item| item.id.clone())
            .collect()
    }

    /// Returns true if the stored copy matches memory: the blob was
    /// readable at open and the last write succeeded.
    pub fn is_persistent(&self) -> bool {
        self.persistent.load(Ordering::SeqCst)
    }

    fn persist(&self, entries: &Entries) {
        if self.detached {
            return;
        }
        let result = encode_queue(entries.in_flight.iter().chain(entries.queued.iter()))
            .map_err(|e| e.to_string())
            .and_then(|blob| self.store.set(&self.key, &blob).map_err(|e| e.to_string()));
        match result {
            Ok(()) => {
                if !self.persistent.swap(true, Ordering::SeqCst) {
                    tracing::info!(key = %self.key, "queue persisted again");
                }
            }
            Err(error) => {
                self.persistent.store(false, Ordering::SeqCst);
                tracing::warn!(key = %self.key, %error, "cannot persist queue, will retry on next change");
            }
        }
    }
}

impl std::fmt::Debug for MutationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationQueue")
            .field("key", &self.key)
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("persistent", &self.is_persistent())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ManualClock;
    use ebbsync_protocol::Record;
    use ebbsync_storage::InMemoryStore;
    use proptest::prelude::*;
    use serde_json::json;

    const KEY: &str = "ebbsync_sync_queue";

    fn insert(n: i64) -> Operation {
        let data: Record = serde_json::from_value(json!({ "n": n })).unwrap();
        Operation::insert("agents", data).unwrap()
    }

    fn numbers(items: &[QueueItem]) -> Vec<i64> {
        items
            .iter()
            .map(|i| i.operation.data().unwrap()["n"].as_i64().unwrap())
            .collect()
    }

    fn queue_on(store: Arc<dyn LocalStore>, capacity: usize) -> MutationQueue {
        MutationQueue::open(store, KEY, capacity, Arc::new(ManualClock::new(1_000)))
    }

    #[test]
    fn enqueue_assigns_ids_and_persists() {
        let store: Arc<dyn LocalStore> = Arc::new(InMemoryStore::new());
        let queue = queue_on(store.clone(), 10);

        let a = queue.enqueue(insert(1));
        let b = queue.enqueue(insert(2));
        assert_ne!(a.item.id, b.item.id);
        assert_eq!(a.item.attempts, 0);
        assert_eq!(a.item.enqueued_at, 1_000);

        let blob = store.get(KEY).unwrap().unwrap();
        assert_eq!(numbers(&decode_queue(&blob).unwrap()), vec![1, 2]);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let queue = queue_on(Arc::new(InMemoryStore::new()), 2);
        queue.enqueue(insert(1));
        queue.enqueue(insert(2));
        let third = queue.enqueue(insert(3));

        assert_eq!(numbers(&third.evicted), vec![1]);
        assert_eq!(numbers(&queue.snapshot()), vec![2, 3]);
    }

    #[test]
    fn requeue_goes_in_front_of_new_items() {
        let queue = queue_on(Arc::new(InMemoryStore::new()), 10);
        queue.enqueue(insert(1));
        queue.enqueue(insert(2));

        let drained = queue.drain_all();
        assert!(queue.is_empty());
        queue.enqueue(insert(3));
        queue.requeue(drained);

        assert_eq!(numbers(&queue.snapshot()), vec![1, 2, 3]);
    }

    #[test]
    fn requeue_trims_over_capacity() {
        let queue = queue_on(Arc::new(InMemoryStore::new()), 2);
        queue.enqueue(insert(1));
        queue.enqueue(insert(2));
        let drained = queue.drain_all();
        queue.enqueue(insert(3));

        let evicted = queue.requeue(drained);
        assert_eq!(numbers(&evicted), vec![1]);
        assert_eq!(numbers(&queue.snapshot()), vec![2, 3]);
    }

    #[test]
    fn reopen_restores_items() {
        let store: Arc<dyn LocalStore> = Arc::new(InMemoryStore::new());
        let queue = queue_on(store.clone(), 10);
        queue.enqueue(insert(1));
        queue.enqueue(insert(2));
        drop(queue);

        let queue = queue_on(store, 10);
        assert_eq!(numbers(&queue.snapshot()), vec![1, 2]);
        assert!(queue.is_persistent());
    }

    #[test]
    fn corrupted_blob_falls_back_to_memory() {
        let store: Arc<dyn LocalStore> = Arc::new(InMemoryStore::new());
        store.set(KEY, "{not a queue").unwrap();

        let queue = queue_on(store.clone(), 10);
        assert!(queue.is_empty());
        assert!(!queue.is_persistent());

        queue.enqueue(insert(1));
        assert_eq!(queue.len(), 1);
        // The corrupted blob is left for inspection.
        assert_eq!(store.get(KEY).unwrap().unwrap(), "{not a queue");
    }

    #[test]
    fn quota_failure_keeps_items_in_memory() {
        let queue = queue_on(Arc::new(InMemoryStore::with_quota(64)), 10);
        for n in 0..5 {
            queue.enqueue(insert(n));
        }
        assert!(!queue.is_persistent());
        assert_eq!(queue.len(), 5);
    }

    #[test]
    fn drained_items_stay_stored_until_settled() {
        let store: Arc<dyn LocalStore> = Arc::new(InMemoryStore::new());
        let stored = || numbers(&decode_queue(&store.get(KEY).unwrap().unwrap()).unwrap());
        let queue = queue_on(store.clone(), 10);
        for n in 1..=3 {
            queue.enqueue(insert(n));
        }

        let mut drained = queue.drain_all();
        assert!(queue.is_empty());
        assert_eq!(queue.in_flight(), 3);
        assert_eq!(stored(), vec![1, 2, 3]);

        queue.enqueue(insert(4));
        assert_eq!(stored(), vec![1, 2, 3, 4]);

        queue.complete(&drained[0].id);
        assert_eq!(stored(), vec![2, 3, 4]);

        drained[1].attempts = 1;
        queue.record_attempt(&drained[1]);
        let blob = decode_queue(&store.get(KEY).unwrap().unwrap()).unwrap();
        assert_eq!(blob[0].attempts, 1);

        queue.requeue(drained.split_off(1));
        assert_eq!(queue.in_flight(), 0);
        assert_eq!(stored(), vec![2, 3, 4]);

        drop(queue);
        let reopened = queue_on(store.clone(), 10);
        assert_eq!(numbers(&reopened.snapshot()), vec![2, 3, 4]);
        assert_eq!(reopened.snapshot()[0].attempts, 1);
    }

    #[test]
    fn stored_len_reads_without_trimming() {
        let store: Arc<dyn LocalStore> = Arc::new(InMemoryStore::new());
        assert_eq!(MutationQueue::stored_len(store.as_ref(), KEY), Ok(0));
        let queue = queue_on(store.clone(), 10);
        for n in 0..4 {
            queue.enqueue(insert(n));
        }
        assert_eq!(MutationQueue::stored_len(store.as_ref(), KEY), Ok(4));

        store.set(KEY, "[{").unwrap();
        assert!(MutationQueue::stored_len(store.as_ref(), KEY).is_err());
    }

    #[test]
    fn pending_for_and_clear() {
        let queue = queue_on(Arc::new(InMemoryStore::new()), 10);
        let agent = queue.enqueue(insert(1)).item.id;
        let data: Record = serde_json::from_value(json!({"user_id": "u1"})).unwrap();
        queue.enqueue(Operation::upsert_on("game_state", data, "user_id").unwrap());

        assert_eq!(queue.pending_for("agents"), vec![agent.clone()]);
        assert!(queue.pending_for("skills").is_empty());
        assert_eq!(queue.remove(&[agent, "missing".to_string()]), 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.clear(), 1);
        assert!(queue.is_empty());
    }

    proptest! {
        #[test]
        fn never_exceeds_capacity(capacity in 1usize..8, count in 0i64..40) {
            let queue = queue_on(Arc::new(InMemoryStore::new()), capacity);
            for n in 0..count {
                queue.enqueue(insert(n));
                prop_assert!(queue.len() <= capacity);
            }
            let kept = numbers(&queue.snapshot());
            let first = (count - capacity as i64).max(0);
            prop_assert_eq!(kept, (first..count).collect::<Vec<_>>());
        }

        #[test]
        fn drain_requeue_preserves_fifo(before in 0i64..10, after in 0i64..10) {
            let queue = queue_on(Arc::new(InMemoryStore::new()), 64);
            for n in 0..before {
                queue.enqueue(insert(n));
            }
            let drained = queue.drain_all();
            for n in before..before + after {
                queue.enqueue(insert(n));
            }
            queue.requeue(drained);
            prop_assert_eq!(numbers(&queue.snapshot()), (0..before + after).collect::<Vec<_>>());
        }
    }
}
