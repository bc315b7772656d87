//! CLI command implementations.

pub mod clear_queue;
pub mod enqueue;
pub mod queue;
pub mod status;
pub mod verify;

use ebbsync_protocol::{decode_queue, QueueItem};
use ebbsync_storage::{FileStore, LocalStore};
use std::error::Error;
use std::path::Path;

/// Storage keys the commands read and write.
#[derive(Debug, Clone)]
pub struct Keys {
    /// Key of the persisted queue.
    pub queue: String,
    /// Key of the last sync time.
    pub last_sync: String,
}

/// Opens the store at `path`, refusing to create one.
pub fn open_store(path: &Path) -> Result<FileStore, Box<dyn Error>> {
    if !path.is_dir() {
        return Err(format!("No store found at {:?}", path).into());
    }
    Ok(FileStore::open(path)?)
}

/// Reads the persisted queue. A missing blob is an empty queue.
pub fn load_queue(store: &dyn LocalStore, key: &str) -> Result<Vec<QueueItem>, Box<dyn Error>> {
    match store.get(key)? {
        Some(blob) => decode_queue(&blob).map_err(|e| -> Box<dyn Error> {
            format!("Persisted queue is unreadable ({}); run verify", e).into()
        }),
        None => Ok(Vec::new()),
    }
}

/// Reads the last sync time, ignoring values that do not parse.
pub fn load_last_sync(store: &dyn LocalStore, key: &str) -> Result<Option<u64>, Box<dyn Error>> {
    Ok(store.get(key)?.and_then(|raw| raw.trim().parse().ok()))
}
