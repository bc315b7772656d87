//! Clear-queue command implementation.

use super::{open_store, Keys};
use ebbsync_engine::{MutationQueue, SystemClock};
use ebbsync_storage::LocalStore;
use std::error::Error;
use std::path::Path;
use std::sync::Arc;

/// Runs the clear-queue command.
pub fn run(path: &Path, keys: &Keys) -> Result<(), Box<dyn Error>> {
    let store = Arc::new(open_store(path)?);
    let removed = clear(store, keys)?;
    println!("Removed {} pending write(s)", removed);
    Ok(())
}

/// Empties the persisted queue and returns how many items it held.
///
/// A queue blob that cannot be decoded is removed outright and counts as
/// zero items.
pub fn clear(store: Arc<dyn LocalStore>, keys: &Keys) -> Result<usize, Box<dyn Error>> {
    let queue = MutationQueue::open(
        Arc::clone(&store),
        keys.queue.as_str(),
        usize::MAX,
        Arc::new(SystemClock),
    );
    if !queue.is_persistent() {
        tracing::warn!(key = %keys.queue, "removing unreadable queue");
        store.remove(&keys.queue)?;
        return Ok(0);
    }

    let removed = queue.clear();
    if !queue.is_persistent() {
        return Err("Failed to persist the queue".into());
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{load_queue, test_support::*};
    use ebbsync_storage::InMemoryStore;

    #[test]
    fn clears_queue() {
        let store = Arc::new(InMemoryStore::new());
        store.set(&keys().queue, QUEUE_BLOB).unwrap();

        assert_eq!(clear(store.clone(), &keys()).unwrap(), 2);
        assert!(load_queue(store.as_ref(), &keys().queue).unwrap().is_empty());
    }

    #[test]
    fn removes_corrupted_blob() {
        let store = Arc::new(InMemoryStore::new());
        store.set(&keys().queue, "garbage").unwrap();

        assert_eq!(clear(store.clone(), &keys()).unwrap(), 0);
        assert!(store.get(&keys().queue).unwrap().is_none());
    }

    #[test]
    fn leaves_last_sync_alone() {
        let store = Arc::new(InMemoryStore::new());
        store.set(&keys().last_sync, "1700000000000").unwrap();
        clear(store.clone(), &keys()).unwrap();
        assert!(store.get(&keys().last_sync).unwrap().is_some());
    }
}
