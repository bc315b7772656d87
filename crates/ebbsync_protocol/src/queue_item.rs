//! Persisted queue envelope.

use crate::error::ProtocolResult;
use crate::operation::Operation;
use serde::{Deserialize, Serialize};

/// A pending write together with its queue bookkeeping.
///
/// Items are created by the mutation queue on enqueue. Only the sync
/// orchestrator increments `attempts`; an item is removed once it executes
/// successfully or reaches the retry ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    /// Opaque unique id.
    pub id: String,
    /// Enqueue time in milliseconds since the Unix epoch.
    pub enqueued_at: u64,
    /// Failed replay attempts so far.
    pub attempts: u32,
    /// The write to replay.
    pub operation: Operation,
}

impl QueueItem {
    /// Creates a fresh item with zero attempts.
    pub fn new(id: impl Into<String>, enqueued_at: u64, operation: Operation) -> Self {
        Self {
            id: id.into(),
            enqueued_at,
            attempts: 0,
            operation,
        }
    }

    /// Returns the target table of the wrapped operation.
    pub fn table(&self) -> &str {
        self.operation.table()
    }
}

/// Encodes a queue as the persisted JSON array.
pub fn encode_queue<'a, I>(items: I) -> ProtocolResult<String>
where
    I: IntoIterator<Item = &'a QueueItem>,
{
    let items: Vec<&QueueItem> = items.into_iter().collect();
    Ok(serde_json::to_string(&items)?)
}

/// Decodes a persisted JSON array into queue items.
///
/// Decoding is all-or-nothing: one malformed item rejects the blob.
pub fn decode_queue(json: &str) -> ProtocolResult<Vec<QueueItem>> {
    Ok(serde_json::from_str(json)?)
}
