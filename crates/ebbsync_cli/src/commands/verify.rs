//! Verify command implementation.

use super::{open_store, Keys};
use ebbsync_protocol::QueueItem;
use ebbsync_storage::LocalStore;
use serde_json::Value;
use std::collections::HashSet;
use std::error::Error;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of queue entries checked.
    pub entries_checked: usize,
    /// Number of entries that decode to a valid item.
    pub valid_entries: usize,
    /// Number of malformed entries.
    pub malformed_entries: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.malformed_entries == 0 && self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path, keys: &Keys) -> Result<(), Box<dyn Error>> {
    println!("Verifying client state at {:?}", path);
    println!();

    let store = open_store(path)?;
    let result = verify(&store, keys)?;

    println!("Queue:");
    println!("  Entries checked: {}", result.entries_checked);
    println!("  Valid entries:   {}", result.valid_entries);
    println!("  Malformed:       {}", result.malformed_entries);
    if !result.errors.is_empty() {
        println!("  Errors:");
        for error in &result.errors {
            println!("    - {}", error);
        }
    }

    println!();
    if result.is_ok() {
        println!("✓ Verification passed");
        Ok(())
    } else {
        println!("✗ Verification failed");
        Err("Verification failed".into())
    }
}

/// Checks the persisted queue entry by entry, and the last sync value.
pub fn verify(store: &dyn LocalStore, keys: &Keys) -> Result<VerifyResult, Box<dyn Error>> {
    let mut result = VerifyResult::default();

    if let Some(raw) = store.get(&keys.last_sync)? {
        if raw.trim().parse::<u64>().is_err() {
            result
                .errors
                .push(format!("Last sync value {:?} is not a millisecond timestamp", raw));
        }
    }

    let Some(blob) = store.get(&keys.queue)? else {
        return Ok(result);
    };

    let entries = match serde_json::from_str::<Value>(&blob) {
        Ok(Value::Array(entries)) => entries,
        Ok(other) => {
            result
                .errors
                .push(format!("Queue is not a JSON array (found {})", kind_of(&other)));
            return Ok(result);
        }
        Err(e) => {
            result.errors.push(format!("Queue is not valid JSON: {}", e));
            return Ok(result);
        }
    };

    let mut seen = HashSet::new();
    for (index, entry) in entries.into_iter().enumerate() {
        result.entries_checked += 1;
        match serde_json::from_value::<QueueItem>(entry) {
            Ok(item) => {
                if !seen.insert(item.id.clone()) {
                    result
                        .errors
                        .push(format!("Entry {}: duplicate id {:?}", index, item.id));
                }
                result.valid_entries += 1;
            }
            Err(e) => {
                result.malformed_entries += 1;
                result.errors.push(format!("Entry {}: {}", index, e));
            }
        }
    }

    tracing::debug!(
        checked = result.entries_checked,
        malformed = result.malformed_entries,
        "queue verified"
    );
    Ok(result)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
