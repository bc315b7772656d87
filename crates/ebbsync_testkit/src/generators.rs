//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data that maintains
//! the invariants of validated operations.

use ebbsync_protocol::{ChangeEvent, ChangeType, Filters, Operation, QueueItem, Record, Scalar};
use proptest::prelude::*;
use serde_json::Value;

/// Strategy for generating valid table names.
pub fn table_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z_]{0,15}").expect("Invalid regex")
}

/// Strategy for generating column names.
pub fn column_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,9}").expect("Invalid regex")
}

/// Strategy for generating filter scalars.
pub fn scalar_strategy() -> impl Strategy<Value = Scalar> {
    prop_oneof![
        any::<bool>().prop_map(Scalar::Bool),
        any::<i64>().prop_map(Scalar::Int),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Scalar::Text),
    ]
}

/// Strategy for generating JSON column values.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::from),
    ]
}

/// Strategy for generating non-empty records.
pub fn record_strategy() -> impl Strategy<Value = Record> {
    prop::collection::btree_map(column_strategy(), value_strategy(), 1..5)
        .prop_map(|columns| columns.into_iter().collect())
}

/// Strategy for generating non-empty filters.
pub fn filters_strategy() -> impl Strategy<Value = Filters> {
    prop::collection::btree_map(column_strategy(), scalar_strategy(), 1..3)
}

/// Strategy for generating valid operations of every kind.
pub fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        (table_name_strategy(), record_strategy())
            .prop_map(|(t, d)| Operation::insert(t, d).expect("valid insert")),
        (table_name_strategy(), record_strategy(), filters_strategy())
            .prop_map(|(t, d, f)| Operation::update(t, d, f).expect("valid update")),
        (table_name_strategy(), filters_strategy())
            .prop_map(|(t, f)| Operation::delete(t, f).expect("valid delete")),
        (
            table_name_strategy(),
            record_strategy(),
            proptest::option::of(column_strategy())
        )
            .prop_map(|(t, d, c)| match c {
                Some(column) => Operation::upsert_on(t, d, column).expect("valid upsert"),
                None => Operation::upsert(t, d).expect("valid upsert"),
            }),
    ]
}

/// Strategy for generating queue items.
pub fn queue_item_strategy() -> impl Strategy<Value = QueueItem> {
    (
        "[a-f0-9]{8}",
        any::<u32>().prop_map(u64::from),
        0u32..3,
        operation_strategy(),
    )
        .prop_map(|(id, enqueued_at, attempts, operation)| {
            let mut item = QueueItem::new(id, enqueued_at, operation);
            item.attempts = attempts;
            item
        })
}

/// Strategy for generating change events on `table` with ids below `max_id`.
pub fn change_event_strategy(table: &'static str, max_id: i64) -> impl Strategy<Value = ChangeEvent> {
    (
        prop_oneof![
            Just(ChangeType::Insert),
            Just(ChangeType::Update),
            Just(ChangeType::Delete)
        ],
        0..max_id,
        any::<i32>(),
    )
        .prop_map(move |(event_type, id, value)| {
            let mut record = Record::new();
            record.insert("id".into(), Value::from(id));
            if event_type != ChangeType::Delete {
                record.insert("value".into(), Value::from(value));
            }
            ChangeEvent {
                table: table.to_string(),
                event_type,
                record,
            }
        })
}
