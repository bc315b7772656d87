//! Test fixtures and engine helpers.
//!
//! Provides a fully wired [`TestEngine`] over in-memory collaborators, plus
//! small builders for records and operations.

use crate::recorder::EventRecorder;
use ebbsync_engine::{
    ManualClock, MemoryPushChannel, MemoryRemote, Resource, StaticIdentity, SyncConfig,
    SyncEngine,
};
use ebbsync_protocol::{Filters, Operation, Record, Scalar};
use ebbsync_storage::{FileStore, InMemoryStore, LocalStore};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Identity the harness signs in with.
pub const USER_ID: &str = "user-1";

/// Clock reading the harness starts at (milliseconds).
pub const START_MILLIS: u64 = 1_700_000_000_000;

/// An engine wired to in-memory collaborators, with automatic cleanup.
pub struct TestEngine {
    /// The engine.
    pub engine: Arc<SyncEngine>,
    /// The remote store fake.
    pub remote: Arc<MemoryRemote>,
    /// The push channel fake.
    pub push: Arc<MemoryPushChannel>,
    /// The identity provider, signed in as [`USER_ID`].
    pub identity: Arc<StaticIdentity>,
    /// The clock, starting at [`START_MILLIS`].
    pub clock: Arc<ManualClock>,
    /// The local store the engine persists to.
    pub store: Arc<dyn LocalStore>,
    /// Records every published event.
    pub recorder: Arc<EventRecorder>,
    config: SyncConfig,
    online: bool,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestEngine {
    /// Creates an online engine over an in-memory store.
    pub fn new(config: SyncConfig) -> Self {
        Self::with_store(config, Arc::new(InMemoryStore::new()))
    }

    /// Creates an offline engine over an in-memory store.
    pub fn offline(config: SyncConfig) -> Self {
        Self::assemble(config, Arc::new(InMemoryStore::new()), false, None)
    }

    /// Creates an online engine over `store`.
    pub fn with_store(config: SyncConfig, store: Arc<dyn LocalStore>) -> Self {
        Self::assemble(config, store, true, None)
    }

    /// Creates an online engine over a file store in a temporary directory.
    pub fn file(config: SyncConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileStore::open(temp_dir.path()).expect("Failed to open file store");
        Self::assemble(config, Arc::new(store), true, Some(temp_dir))
    }

    fn assemble(
        config: SyncConfig,
        store: Arc<dyn LocalStore>,
        online: bool,
        temp_dir: Option<TempDir>,
    ) -> Self {
        let remote = Arc::new(MemoryRemote::new());
        let identity = Arc::new(StaticIdentity::signed_in(USER_ID));
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        Self::connect(config, store, remote, identity, clock, online, temp_dir)
    }

    #[allow(clippy::too_many_arguments)]
    fn connect(
        config: SyncConfig,
        store: Arc<dyn LocalStore>,
        remote: Arc<MemoryRemote>,
        identity: Arc<StaticIdentity>,
        clock: Arc<ManualClock>,
        online: bool,
        temp_dir: Option<TempDir>,
    ) -> Self {
        let engine = SyncEngine::builder(config.clone())
            .with_remote(remote.clone())
            .with_local_store(Arc::clone(&store))
            .with_identity(identity.clone())
            .with_clock(clock.clone())
            .with_online(online)
            .build()
            .expect("Failed to build engine");
        let engine = Arc::new(engine);
        let recorder = EventRecorder::attach(&engine);

        Self {
            engine,
            remote,
            push: Arc::new(MemoryPushChannel::new()),
            identity,
            clock,
            store,
            recorder,
            config,
            online,
            _temp_dir: temp_dir,
        }
    }

    /// Simulates a process restart: drops the engine and builds a new one
    /// over the same persisted state and remote.
    ///
    /// Every other handle to the engine must be dropped first, since a file
    /// store stays locked while the old engine lives.
    pub fn restart(self) -> Self {
        let Self {
            engine,
            remote,
            identity,
            clock,
            store,
            recorder,
            config,
            online,
            _temp_dir: temp_dir,
            ..
        } = self;
        drop(recorder);
        drop(engine);

        let store: Arc<dyn LocalStore> = match &temp_dir {
            Some(dir) => {
                drop(store);
                Arc::new(FileStore::open(dir.path()).expect("Failed to reopen file store"))
            }
            None => store,
        };
        Self::connect(config, store, remote, identity, clock, online, temp_dir)
    }

    /// Returns the store directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().to_path_buf())
    }
}

impl std::ops::Deref for TestEngine {
    type Target = SyncEngine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

/// Configuration monitoring the resources of a typical game client:
/// three per-user singletons and two collections.
pub fn game_config() -> SyncConfig {
    SyncConfig::new()
        .with_resource(Resource::singleton("game_state").with_cache_key("games_state"))
        .with_resource(Resource::singleton("business_state"))
        .with_resource(Resource::singleton("gamedev_state"))
        .with_resource(Resource::collection("agents"))
        .with_resource(Resource::collection("skills"))
}

/// Converts a JSON object literal into a [`Record`].
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// An `id = <id>` filter.
pub fn id_filter(id: i64) -> Filters {
    Filters::from([("id".to_string(), Scalar::Int(id))])
}

/// An insert of `{ "id": id, "user_id": USER_ID }`.
pub fn insert_op(table: &str, id: i64) -> Operation {
    let data = record(serde_json::json!({ "id": id, "user_id": USER_ID }));
    Operation::insert(table, data).expect("Failed to build insert")
}

/// An update of row `id` with `changes`.
pub fn update_op(table: &str, id: i64, changes: Value) -> Operation {
    Operation::update(table, record(changes), id_filter(id)).expect("Failed to build update")
}

/// A delete of row `id`.
pub fn delete_op(table: &str, id: i64) -> Operation {
    Operation::delete(table, id_filter(id)).expect("Failed to build delete")
}

/// The `id` column of every queued operation that has one, in queue order.
pub fn queued_ids(engine: &SyncEngine) -> Vec<i64> {
    engine
        .pending()
        .iter()
        .filter_map(|item| {
            let from_data = item
                .operation
                .data()
                .and_then(|data| data.get("id"))
                .and_then(Value::as_i64);
            if from_data.is_some() {
                return from_data;
            }
            match item.operation.filters()?.get("id")? {
                Scalar::Int(id) => Some(*id),
                _ => None,
            }
        })
        .collect()
}
