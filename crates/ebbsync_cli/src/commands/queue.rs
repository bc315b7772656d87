//! Queue listing command implementation.

use super::{load_queue, open_store, Keys};
use ebbsync_protocol::QueueItem;
use std::error::Error;
use std::path::Path;

/// Runs the queue command.
pub fn run(path: &Path, keys: &Keys, format: &str) -> Result<(), Box<dyn Error>> {
    let store = open_store(path)?;
    let items = load_queue(&store, &keys.queue)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&items)?),
        _ => {
            if items.is_empty() {
                println!("Queue is empty");
            }
            for (position, item) in items.iter().enumerate() {
                println!("{}", describe(position, item));
            }
        }
    }
    Ok(())
}

/// One text line per item.
pub fn describe(position: usize, item: &QueueItem) -> String {
    let op = &item.operation;
    let mut line = format!(
        "{:>3}. {} {:<6} {} (attempts: {}, enqueued: {})",
        position + 1,
        item.id,
        op.kind(),
        op.table(),
        item.attempts,
        item.enqueued_at
    );
    if let Some(filters) = op.filters() {
        let filters: Vec<String> = filters.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        line.push_str(&format!(" where {}", filters.join(", ")));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::*;
    use ebbsync_protocol::decode_queue;

    #[test]
    fn describes_items() {
        let items = decode_queue(QUEUE_BLOB).unwrap();
        let first = describe(0, &items[0]);
        assert!(first.starts_with("  1. a insert"));
        assert!(first.contains("agents"));

        let second = describe(1, &items[1]);
        assert!(second.contains("attempts: 2"));
        assert!(second.ends_with("where id=9"));
    }
}
