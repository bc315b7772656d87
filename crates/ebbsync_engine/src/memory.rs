//! In-memory collaborators for tests and offline demos.
//!
//! - [`MemoryRemote`] - a table store with scripted failures and a call log
//! - [`MemoryPushChannel`] - a push channel driven by [`MemoryPushChannel::emit`]
//! - [`StaticIdentity`] - a settable identity
//! - [`ManualClock`] - a clock that only moves when told to

use crate::error::{RemoteError, RemoteResult};
use crate::transport::{ChangeStream, Clock, Identity, IdentityProvider, PushChannel, RemoteStore};
use async_trait::async_trait;
use ebbsync_protocol::{ChangeEvent, Filters, Record};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};

/// A recorded call against [`MemoryRemote`].
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    /// Method name (`create`, `select`, `update`, `delete`, `upsert`).
    pub method: &'static str,
    /// Target table.
    pub table: String,
    /// Record argument, if any.
    pub record: Option<Record>,
    /// Filter argument (empty when the method takes none).
    pub filters: Filters,
}

#[derive(Debug, Default)]
struct FailurePlan {
    always: Option<RemoteError>,
    next: VecDeque<RemoteError>,
    tables: HashMap<String, RemoteError>,
}

impl FailurePlan {
    fn failure_for(&mut self, table: &str) -> Option<RemoteError> {
        if let Some(err) = self.next.pop_front() {
            return Some(err);
        }
        if let Some(err) = self.tables.get(table) {
            return Some(err.clone());
        }
        self.always.clone()
    }
}

/// An in-memory remote store.
///
/// Rows live in per-table vectors. Inserted rows without an `id` get a
/// sequential integer id. Every call is logged, including failed ones.
#[derive(Debug)]
pub struct MemoryRemote {
    tables: Mutex<BTreeMap<String, Vec<Record>>>,
    calls: Mutex<Vec<RemoteCall>>,
    failures: Mutex<FailurePlan>,
    latency: RwLock<Option<Duration>>,
    next_id: AtomicI64,
}

impl MemoryRemote {
    /// Creates an empty remote.
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(FailurePlan::default()),
            latency: RwLock::new(None),
            next_id: AtomicI64::new(1),
        }
    }

    /// Replaces the rows of `table`.
    pub fn seed(&self, table: &str, rows: Vec<Record>) {
        self.tables.lock().insert(table.to_string(), rows);
    }

    /// Returns the rows of `table`.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.tables.lock().get(table).cloned().unwrap_or_default()
    }

    /// Returns every call made so far.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    /// Returns the mutating calls made so far (everything except `select`).
    pub fn mutations(&self) -> Vec<RemoteCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.method != "select")
            .cloned()
            .collect()
    }

    /// Makes every call fail with `err` until [`MemoryRemote::heal`].
    pub fn fail_always(&self, err: RemoteError) {
        self.failures.lock().always = Some(err);
    }

    /// Makes the next call fail with `err`.
    pub fn fail_next(&self, err: RemoteError) {
        self.failures.lock().next.push_back(err);
    }

    /// Makes every call on `table` fail with `err`.
    pub fn fail_table(&self, table: &str, err: RemoteError) {
        self.failures.lock().tables.insert(table.to_string(), err);
    }

    /// Clears all scripted failures.
    pub fn heal(&self) {
        *self.failures.lock() = FailurePlan::default();
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = Some(latency);
    }

    async fn begin(
        &self,
        method: &'static str,
        table: &str,
        record: Option<&Record>,
        filters: &Filters,
    ) -> RemoteResult<()> {
        self.calls.lock().push(RemoteCall {
            method,
            table: table.to_string(),
            record: record.cloned(),
            filters: filters.clone(),
        });

        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        match self.failures.lock().failure_for(table) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn with_id(&self, record: &Record) -> Record {
        let mut row = record.clone();
        if row.get("id").map_or(true, Value::is_null) {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            row.insert("id".to_string(), Value::from(id));
        }
        row
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns true if `row` satisfies every equality in `filters`.
pub fn row_matches(row: &Record, filters: &Filters) -> bool {
    filters
        .iter()
        .all(|(column, scalar)| row.get(column).is_some_and(|v| scalar.matches(v)))
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn create(&self, table: &str, record: &Record) -> RemoteResult<Vec<Record>> {
        self.begin("create", table, Some(record), &Filters::new())
            .await?;
        let row = self.with_id(record);
        self.tables
            .lock()
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        Ok(vec![row])
    }

    async fn select(&self, table: &str, filters: &Filters) -> RemoteResult<Vec<Record>> {
        self.begin("select", table, None, filters).await?;
        Ok(self
            .rows(table)
            .into_iter()
            .filter(|row| row_matches(row, filters))
            .collect())
    }

    async fn update(
        &self,
        table: &str,
        changes: &Record,
        filters: &Filters,
    ) -> RemoteResult<Vec<Record>> {
        self.begin("update", table, Some(changes), filters).await?;
        let mut tables = self.tables.lock();
        let mut updated = Vec::new();
        for row in tables.entry(table.to_string()).or_default().iter_mut() {
            if row_matches(row, filters) {
                for (column, value) in changes {
                    row.insert(column.clone(), value.clone());
                }
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    async fn delete(&self, table: &str, filters: &Filters) -> RemoteResult<Vec<Record>> {
        self.begin("delete", table, None, filters).await?;
        let mut tables = self.tables.lock();
        let rows = tables.entry(table.to_string()).or_default();
        let (removed, kept): (Vec<Record>, Vec<Record>) =
            rows.drain(..).partition(|row| row_matches(row, filters));
        *rows = kept;
        Ok(removed)
    }

    async fn upsert(
        &self,
        table: &str,
        record: &Record,
        on_conflict: Option<&str>,
    ) -> RemoteResult<Vec<Record>> {
        self.begin("upsert", table, Some(record), &Filters::new())
            .await?;
        let key = on_conflict.unwrap_or("id");
        let mut tables = self.tables.lock();
        let rows = tables.entry(table.to_string()).or_default();

        let existing = record
            .get(key)
            .filter(|v| !v.is_null())
            .and_then(|value| rows.iter_mut().find(|row| row.get(key) == Some(value)));

        let row = match existing {
            Some(row) => {
                for (column, value) in record {
                    row.insert(column.clone(), value.clone());
                }
                row.clone()
            }
            None => {
                let row = self.with_id(record);
                rows.push(row.clone());
                row
            }
        };
        Ok(vec![row])
    }
}

struct PushSubscriber {
    table: String,
    filter: Filters,
    sender: UnboundedSender<ChangeEvent>,
}

/// An in-memory push channel.
///
/// Subscribers receive every event emitted for their table whose record
/// matches their filter. Records missing a filtered column (a delete that
/// only carries `id`) are delivered.
#[derive(Default)]
pub struct MemoryPushChannel {
    subscribers: Mutex<Vec<PushSubscriber>>,
    refuse: Mutex<Option<RemoteError>>,
}

impl MemoryPushChannel {
    /// Creates a channel with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent subscriptions fail with `err`.
    pub fn refuse_subscriptions(&self, err: RemoteError) {
        *self.refuse.lock() = Some(err);
    }

    /// Delivers `event` to matching subscribers and returns how many got it.
    pub fn emit(&self, event: ChangeEvent) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| !s.sender.is_closed());

        let mut delivered = 0;
        for subscriber in subscribers.iter() {
            if subscriber.table != event.table {
                continue;
            }
            let visible = subscriber.filter.iter().all(|(column, scalar)| {
                event
                    .record
                    .get(column)
                    .map_or(true, |value| scalar.matches(value))
            });
            if visible && subscriber.sender.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Returns the number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| !s.sender.is_closed());
        subscribers.len()
    }
}

#[async_trait]
impl PushChannel for MemoryPushChannel {
    async fn subscribe(&self, table: &str, filter: &Filters) -> RemoteResult<ChangeStream> {
        if let Some(err) = self.refuse.lock().clone() {
            return Err(err);
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.lock().push(PushSubscriber {
            table: table.to_string(),
            filter: filter.clone(),
            sender,
        });
        Ok(receiver)
    }
}

/// An identity provider whose identity is set by hand.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    identity: RwLock<Option<Identity>>,
}

impl StaticIdentity {
    /// Creates a provider signed in as `id`.
    pub fn signed_in(id: impl Into<String>) -> Self {
        Self {
            identity: RwLock::new(Some(Identity::new(id))),
        }
    }

    /// Creates a signed-out provider.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Signs in as `id`.
    pub fn sign_in(&self, id: impl Into<String>) {
        *self.identity.write() = Some(Identity::new(id));
    }

    /// Signs out.
    pub fn sign_out(&self) {
        *self.identity.write() = None;
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_identity(&self) -> Option<Identity> {
        self.identity.read().clone()
    }
}

/// A clock that advances only when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a clock reading `start` milliseconds.
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Sets the clock.
    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
