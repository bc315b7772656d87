//! Typed view over the local store for monitored resources.

use crate::config::{Resource, ResourceKind};
use crate::error::{SyncError, SyncResult};
use ebbsync_protocol::{record_id, ChangeEvent, ChangeType, Record};
use ebbsync_storage::LocalStore;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

/// The local copy of every monitored resource.
///
/// A singleton is cached as one JSON object, a collection as a JSON array
/// of objects keyed by `id`. Read-modify-write updates are serialized by a
/// write lock, so the realtime path and the pull path never interleave
/// inside one entry.
pub struct LocalCache {
    store: Arc<dyn LocalStore>,
    resources: Vec<Resource>,
    write: Mutex<()>,
}

impl LocalCache {
    /// Creates a cache for `resources` over `store`.
    pub fn new(store: Arc<dyn LocalStore>, resources: Vec<Resource>) -> Self {
        Self {
            store,
            resources,
            write: Mutex::new(()),
        }
    }

    /// The monitored resources.
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    /// Finds the resource mirroring `table`.
    pub fn resource(&self, table: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.table == table)
    }

    /// Finds the resource cached under `key`.
    pub fn resource_by_key(&self, key: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.cache_key == key)
    }

    /// Reads the cached value under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::CorruptedCache`] if the entry is not valid JSON.
    pub fn read(&self, key: &str) -> SyncResult<Option<Value>> {
        match self.store.get(key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| SyncError::CorruptedCache {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Reads a cached collection; a missing entry is empty.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::CorruptedCache`] if the entry is not an array of
    /// objects.
    pub fn collection(&self, key: &str) -> SyncResult<Vec<Record>> {
        self.rows(key)?
            .into_iter()
            .map(|row| match row {
                Value::Object(record) => Ok(record),
                other => Err(SyncError::CorruptedCache {
                    key: key.to_string(),
                    message: format!("expected an object, found {other}"),
                }),
            })
            .collect()
    }

    /// Overwrites the entry under `key`.
    pub fn replace(&self, key: &str, value: &Value) -> SyncResult<()> {
        let _guard = self.write.lock();
        self.write_value(key, value)
    }

    /// Merges a pushed change into the cache.
    ///
    /// Returns false if the event was ignored: a collection event whose
    /// record has no `id`.
    pub fn apply_change(&self, resource: &Resource, event: &ChangeEvent) -> SyncResult<bool> {
        let _guard = self.write.lock();
        let key = resource.cache_key.as_str();

        match (resource.kind, event.event_type) {
            (ResourceKind::Singleton, ChangeType::Delete) => {
                self.store.remove(key)?;
            }
            (ResourceKind::Singleton, _) => {
                self.write_value(key, &Value::Object(event.record.clone()))?;
            }
            (ResourceKind::Collection, event_type) => {
                let Some(id) = event.record_id() else {
                    tracing::warn!(table = %event.table, "change event without id ignored");
                    return Ok(false);
                };
                let mut rows = self.rows(key)?;
                if event_type == ChangeType::Delete {
                    rows.retain(|row| row.get("id") != Some(id));
                } else {
                    upsert_row(&mut rows, id, event.record.clone());
                }
                self.write_value(key, &Value::Array(rows))?;
            }
        }
        Ok(true)
    }

    /// Writes a locally saved record ahead of remote confirmation.
    ///
    /// Singletons are replaced. Collection rows are replaced by `id`, or
    /// appended when the record has none.
    pub fn merge_record(&self, resource: &Resource, record: &Record) -> SyncResult<()> {
        let _guard = self.write.lock();
        let key = resource.cache_key.as_str();

        match resource.kind {
            ResourceKind::Singleton => self.write_value(key, &Value::Object(record.clone())),
            ResourceKind::Collection => {
                let mut rows = self.rows(key)?;
                match record_id(record) {
                    Some(id) => upsert_row(&mut rows, id, record.clone()),
                    None => rows.push(Value::Object(record.clone())),
                }
                self.write_value(key, &Value::Array(rows))
            }
        }
    }

    fn rows(&self, key: &str) -> SyncResult<Vec<Value>> {
        match self.read(key)? {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(rows)) => Ok(rows),
            Some(_) => Err(SyncError::CorruptedCache {
                key: key.to_string(),
                message: "expected an array".into(),
            }),
        }
    }

    fn write_value(&self, key: &str, value: &Value) -> SyncResult<()> {
        let raw = serde_json::to_string(value).map_err(ebbsync_protocol::ProtocolError::from)?;
        self.store.set(key, &raw)?;
        Ok(())
    }
}

fn upsert_row(rows: &mut Vec<Value>, id: &Value, record: Record) {
    match rows.iter_mut().find(|row| row.get("id") == Some(id)) {
        Some(row) => *row = Value::Object(record),
        None => rows.push(Value::Object(record)),
    }
}
