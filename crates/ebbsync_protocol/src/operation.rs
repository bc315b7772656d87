//! Queued write operations.

use crate::error::{ProtocolError, ProtocolResult};
use crate::value::{Filters, Record};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of write operation, as named on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Create a new row.
    Insert,
    /// Modify rows matching the filters.
    Update,
    /// Remove rows matching the filters.
    Delete,
    /// Create or replace a row by conflict key.
    Upsert,
}

impl OperationKind {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::Upsert => "upsert",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A local write waiting to be replayed against the remote store.
///
/// Each variant carries exactly the fields its kind needs. Values are
/// validated on construction and on decoding, so an `Operation` that exists
/// is always well-formed:
///
/// - the table name is non-empty and has no whitespace
/// - `Update` has non-empty data and at least one filter
/// - `Delete` has at least one filter and no data
/// - `Insert` and `Upsert` carry no filters
///
/// # Wire format
///
/// ```json
/// { "type": "update", "table": "agents", "data": {"level": 3}, "filters": {"id": 5} }
/// ```
///
/// `Upsert` may also carry `"onConflict": "<column>"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "OperationWire", into = "OperationWire")]
pub enum Operation {
    /// Create a new row.
    Insert {
        /// Target table.
        table: String,
        /// Row to create.
        data: Record,
    },
    /// Modify rows matching `filters`.
    Update {
        /// Target table.
        table: String,
        /// Columns to change.
        data: Record,
        /// Row predicate.
        filters: Filters,
    },
    /// Remove rows matching `filters`.
    Delete {
        /// Target table.
        table: String,
        /// Row predicate.
        filters: Filters,
    },
    /// Create or replace a row.
    Upsert {
        /// Target table.
        table: String,
        /// Row to write.
        data: Record,
        /// Column the remote store resolves duplicates on; the primary key when absent.
        on_conflict: Option<String>,
    },
}

impl Operation {
    /// Creates a validated insert.
    pub fn insert(table: impl Into<String>, data: Record) -> ProtocolResult<Self> {
        let table = checked_table(table.into())?;
        Ok(Operation::Insert { table, data })
    }

    /// Creates a validated update.
    pub fn update(
        table: impl Into<String>,
        data: Record,
        filters: Filters,
    ) -> ProtocolResult<Self> {
        let table = checked_table(table.into())?;
        if data.is_empty() {
            return Err(ProtocolError::MissingData {
                kind: "update",
                table,
            });
        }
        if filters.is_empty() {
            return Err(ProtocolError::MissingFilters {
                kind: "update",
                table,
            });
        }
        Ok(Operation::Update {
            table,
            data,
            filters,
        })
    }

    /// Creates a validated delete.
    pub fn delete(table: impl Into<String>, filters: Filters) -> ProtocolResult<Self> {
        let table = checked_table(table.into())?;
        if filters.is_empty() {
            return Err(ProtocolError::MissingFilters {
                kind: "delete",
                table,
            });
        }
        Ok(Operation::Delete { table, filters })
    }

    /// Creates a validated upsert on the table's primary key.
    pub fn upsert(table: impl Into<String>, data: Record) -> ProtocolResult<Self> {
        let table = checked_table(table.into())?;
        Ok(Operation::Upsert {
            table,
            data,
            on_conflict: None,
        })
    }

    /// Creates a validated upsert resolved on `column`.
    pub fn upsert_on(
        table: impl Into<String>,
        data: Record,
        column: impl Into<String>,
    ) -> ProtocolResult<Self> {
        let table = checked_table(table.into())?;
        Ok(Operation::Upsert {
            table,
            data,
            on_conflict: Some(column.into()),
        })
    }

    /// Returns the operation kind.
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Insert { .. } => OperationKind::Insert,
            Operation::Update { .. } => OperationKind::Update,
            Operation::Delete { .. } => OperationKind::Delete,
            Operation::Upsert { .. } => OperationKind::Upsert,
        }
    }

    /// Returns the target table.
    pub fn table(&self) -> &str {
        match self {
            Operation::Insert { table, .. }
            | Operation::Update { table, .. }
            | Operation::Delete { table, .. }
            | Operation::Upsert { table, .. } => table,
        }
    }

    /// Returns the data record, if the kind carries one.
    pub fn data(&self) -> Option<&Record> {
        match self {
            Operation::Insert { data, .. }
            | Operation::Update { data, .. }
            | Operation::Upsert { data, .. } => Some(data),
            Operation::Delete { .. } => None,
        }
    }

    /// Returns the row predicate (empty for insert and upsert).
    pub fn filters(&self) -> Option<&Filters> {
        match self {
            Operation::Update { filters, .. } | Operation::Delete { filters, .. } => Some(filters),
            Operation::Insert { .. } | Operation::Upsert { .. } => None,
        }
    }

    /// Encodes to the JSON wire format.
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes and validates the JSON wire format.
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn checked_table(table: String) -> ProtocolResult<String> {
    if table.is_empty() || table.chars().any(char::is_whitespace) {
        return Err(ProtocolError::InvalidTable(table));
    }
    Ok(table)
}

/// Flat wire shape shared by every kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationWire {
    #[serde(rename = "type")]
    kind: OperationKind,
    table: String,
    #[serde(default)]
    data: Option<Record>,
    #[serde(default)]
    filters: Filters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    on_conflict: Option<String>,
}

impl TryFrom<OperationWire> for Operation {
    type Error = ProtocolError;

    fn try_from(wire: OperationWire) -> ProtocolResult<Self> {
        let OperationWire {
            kind,
            table,
            data,
            filters,
            on_conflict,
        } = wire;

        match kind {
            OperationKind::Insert | OperationKind::Upsert => {
                if !filters.is_empty() {
                    return Err(ProtocolError::UnexpectedFilters {
                        kind: kind.as_str(),
                        table,
                    });
                }
                let Some(data) = data else {
                    return Err(ProtocolError::MissingData {
                        kind: kind.as_str(),
                        table,
                    });
                };
                if kind == OperationKind::Insert {
                    Operation::insert(table, data)
                } else {
                    let table = checked_table(table)?;
                    Ok(Operation::Upsert {
                        table,
                        data,
                        on_conflict,
                    })
                }
            }
            OperationKind::Update => {
                let data = data.ok_or_else(|| ProtocolError::MissingData {
                    kind: "update",
                    table: table.clone(),
                })?;
                Operation::update(table, data, filters)
            }
            OperationKind::Delete => {
                if data.is_some() {
                    return Err(ProtocolError::UnexpectedData(table));
                }
                Operation::delete(table, filters)
            }
        }
    }
}

impl From<Operation> for OperationWire {
    fn from(op: Operation) -> Self {
        let kind = op.kind();
        match op {
            Operation::Insert { table, data } => OperationWire {
                kind,
                table,
                data: Some(data),
                filters: Filters::new(),
                on_conflict: None,
            },
            Operation::Update {
                table,
                data,
                filters,
            } => OperationWire {
                kind,
                table,
                data: Some(data),
                filters,
                on_conflict: None,
            },
            Operation::Delete { table, filters } => OperationWire {
                kind,
                table,
                data: None,
                filters,
                on_conflict: None,
            },
            Operation::Upsert {
                table,
                data,
                on_conflict,
            } => OperationWire {
                kind,
                table,
                data: Some(data),
                filters: Filters::new(),
                on_conflict,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Scalar;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        serde_json::from_value(value).unwrap()
    }

    fn id_filter(id: i64) -> Filters {
        Filters::from([("id".to_string(), Scalar::Int(id))])
    }

    #[test]
    fn update_requires_filters_and_data() {
        let err = Operation::update("agents", record(json!({"a": 1})), Filters::new()).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingFilters { kind: "update", .. }));

        let err = Operation::update("agents", Record::new(), id_filter(1)).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingData { kind: "update", .. }));
    }

    #[test]
    fn delete_requires_filters() {
        assert!(Operation::delete("agents", Filters::new()).is_err());
        assert!(Operation::delete("agents", id_filter(5)).is_ok());
    }

    #[test]
    fn table_name_is_checked() {
        assert!(matches!(
            Operation::insert("", Record::new()),
            Err(ProtocolError::InvalidTable(_))
        ));
        assert!(Operation::insert("game state", Record::new()).is_err());
    }

    #[test]
    fn wire_shape_for_delete() {
        let op = Operation::delete("agents", id_filter(5)).unwrap();
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(
            value,
            json!({"type": "delete", "table": "agents", "data": null, "filters": {"id": 5}})
        );
    }

    #[test]
    fn wire_shape_for_upsert_with_conflict_key() {
        let op = Operation::upsert_on("game_state", record(json!({"user_id": "u1"})), "user_id")
            .unwrap();
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["type"], "upsert");
        assert_eq!(value["onConflict"], "user_id");
        assert_eq!(value["filters"], json!({}));
    }

    #[test]
    fn decoding_applies_validation() {
        let bad_delete = r#"{"type":"delete","table":"agents","data":null,"filters":{}}"#;
        assert!(Operation::from_json(bad_delete).is_err());

        let insert_with_filters =
            r#"{"type":"insert","table":"agents","data":{"a":1},"filters":{"id":1}}"#;
        assert!(Operation::from_json(insert_with_filters).is_err());

        let unknown = r#"{"type":"merge","table":"agents","data":{},"filters":{}}"#;
        assert!(Operation::from_json(unknown).is_err());
    }

    #[test]
    fn decoding_tolerates_missing_filters_field() {
        let op = Operation::from_json(r#"{"type":"insert","table":"skills","data":{"id":1}}"#)
            .unwrap();
        assert_eq!(op.kind(), OperationKind::Insert);
        assert_eq!(op.table(), "skills");
        assert!(op.filters().is_none());
    }

    #[test]
    fn accessors() {
        let op = Operation::update("agents", record(json!({"level": 2})), id_filter(9)).unwrap();
        assert_eq!(op.kind().to_string(), "update");
        assert_eq!(op.data().unwrap()["level"], 2);
        assert_eq!(op.filters().unwrap()["id"], Scalar::Int(9));
    }
}
