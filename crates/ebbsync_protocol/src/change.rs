//! Server-pushed change events.

use crate::value::{record_id, Record};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type of change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    /// Row was inserted.
    Insert,
    /// Row was updated.
    Update,
    /// Row was deleted.
    Delete,
}

/// A single change pushed by the realtime channel.
///
/// For `Insert` and `Update` the record is the new row. For `Delete` it is
/// the removed row (at least its `id`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// Table the change happened in.
    pub table: String,
    /// Type of change.
    pub event_type: ChangeType,
    /// Affected row.
    pub record: Record,
}

impl ChangeEvent {
    /// Creates an insert event.
    pub fn insert(table: impl Into<String>, record: Record) -> Self {
        Self::new(table, ChangeType::Insert, record)
    }

    /// Creates an update event.
    pub fn update(table: impl Into<String>, record: Record) -> Self {
        Self::new(table, ChangeType::Update, record)
    }

    /// Creates a delete event.
    pub fn delete(table: impl Into<String>, record: Record) -> Self {
        Self::new(table, ChangeType::Delete, record)
    }

    fn new(table: impl Into<String>, event_type: ChangeType, record: Record) -> Self {
        Self {
            table: table.into(),
            event_type,
            record,
        }
    }

    /// Returns the `id` of the affected row, if present.
    pub fn record_id(&self) -> Option<&Value> {
        record_id(&self.record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_push_payload() {
        let event: ChangeEvent = serde_json::from_value(json!({
            "table": "agents",
            "eventType": "DELETE",
            "record": {"id": 5}
        }))
        .unwrap();
        assert_eq!(event.event_type, ChangeType::Delete);
        assert_eq!(event.record_id(), Some(&json!(5)));
    }

    #[test]
    fn constructors_set_type() {
        let record: Record = serde_json::from_value(json!({"id": "a"})).unwrap();
        assert_eq!(ChangeEvent::insert("t", record.clone()).event_type, ChangeType::Insert);
        assert_eq!(ChangeEvent::update("t", record.clone()).event_type, ChangeType::Update);
        assert_eq!(ChangeEvent::delete("t", record).event_type, ChangeType::Delete);
    }
}
