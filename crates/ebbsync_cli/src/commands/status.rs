//! Status command implementation.

use super::{load_last_sync, load_queue, open_store, Keys};
use ebbsync_engine::{time_ago, Clock, SystemClock};
use ebbsync_storage::LocalStore;
use serde::Serialize;
use std::error::Error;
use std::path::Path;

/// Summary of the persisted client state.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Number of pending writes.
    pub queue_length: usize,
    /// Enqueue time of the oldest pending write.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_enqueued_at: Option<u64>,
    /// Highest attempt count among pending writes.
    pub max_attempts: u32,
    /// Last successful sync in epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<u64>,
    /// Human-readable age of the last sync.
    pub last_sync_ago: String,
}

/// Builds the report from `store` as of `now`.
pub fn collect(
    store: &dyn LocalStore,
    keys: &Keys,
    now: u64,
) -> Result<StatusReport, Box<dyn Error>> {
    let items = load_queue(store, &keys.queue)?;
    let last_sync = load_last_sync(store, &keys.last_sync)?;

    Ok(StatusReport {
        queue_length: items.len(),
        oldest_enqueued_at: items.first().map(|item| item.enqueued_at),
        max_attempts: items.iter().map(|item| item.attempts).max().unwrap_or(0),
        last_sync,
        last_sync_ago: last_sync
            .map(|at| time_ago(at, now))
            .unwrap_or_else(|| "never".to_string()),
    })
}

/// Runs the status command.
pub fn run(path: &Path, keys: &Keys, format: &str) -> Result<(), Box<dyn Error>> {
    let store = open_store(path)?;
    let report = collect(&store, keys, SystemClock.now_millis())?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => {
            println!("ebbsync Client State");
            println!("====================");
            println!();
            println!("Path: {}", path.display());
            println!();
            println!("Pending writes: {}", report.queue_length);
            if report.queue_length > 0 {
                println!("Most attempts:  {}", report.max_attempts);
            }
            println!("Last sync:      {}", report.last_sync_ago);
        }
    }
    Ok(())
}
