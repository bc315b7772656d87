//! Enqueue command implementation.

use super::{open_store, Keys};
use ebbsync_engine::{Enqueued, MutationQueue, SystemClock};
use ebbsync_protocol::Operation;
use ebbsync_storage::LocalStore;
use std::error::Error;
use std::path::Path;
use std::sync::Arc;

/// Runs the enqueue command.
pub fn run(path: &Path, keys: &Keys, op: &str, capacity: usize) -> Result<(), Box<dyn Error>> {
    let store = Arc::new(open_store(path)?);
    let enqueued = enqueue(store, keys, op, capacity)?;

    let item = &enqueued.item;
    println!("Queued {} ({} {})", item.id, item.operation.kind(), item.table());
    for evicted in &enqueued.evicted {
        println!("Evicted {} to stay within capacity {}", evicted.id, capacity);
    }
    Ok(())
}

/// Parses `op` and appends it to the persisted queue.
///
/// # Errors
///
/// Fails if the operation is invalid, if the persisted queue already holds
/// more than `capacity` items, or if it cannot be read or written; the CLI
/// never trims silently or falls back to an in-memory queue.
pub fn enqueue(
    store: Arc<dyn LocalStore>,
    keys: &Keys,
    op: &str,
    capacity: usize,
) -> Result<Enqueued, Box<dyn Error>> {
    let operation = Operation::from_json(op)?;
    let stored = MutationQueue::stored_len(store.as_ref(), &keys.queue)
        .map_err(|e| format!("Persisted queue is unreadable ({}); run verify", e))?;
    if stored > capacity {
        return Err(format!(
            "Queue holds {} items, more than --capacity {}; nothing was changed",
            stored, capacity
        )
        .into());
    }

    let queue = MutationQueue::open(
        store,
        keys.queue.as_str(),
        capacity,
        Arc::new(SystemClock),
    );
    if !queue.is_persistent() {
        return Err("Persisted queue is unreadable; run verify".into());
    }

    let enqueued = queue.enqueue(operation);
    if !queue.is_persistent() {
        return Err("Failed to persist the queue".into());
    }
    Ok(enqueued)
}
