//! Integration tests for the sync engine against in-memory collaborators.

use ebbsync_engine::{
    RealtimeListener, RemoteError, SaveOutcome, SyncDriver, SyncReport, SyncStatus,
    DEFAULT_QUEUE_KEY,
};
use ebbsync_protocol::{
    decode_queue, ChangeEvent, ConflictPolicy, ConflictResolution, Operation, QueueItem,
};
use ebbsync_storage::LocalStore;
use ebbsync_testkit::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

fn stored_queue(store: &dyn LocalStore) -> Vec<QueueItem> {
    store
        .get(DEFAULT_QUEUE_KEY)
        .unwrap()
        .map(|blob| decode_queue(&blob).unwrap())
        .unwrap_or_default()
}

#[tokio::test]
async fn capacity_evicts_oldest_item() {
    let t = TestEngine::offline(game_config().with_queue_capacity(2));
    t.enqueue(insert_op("agents", 1));
    t.enqueue(insert_op("agents", 2));
    t.enqueue(insert_op("agents", 3));

    assert_eq!(queued_ids(&t), vec![2, 3]);
    assert_eq!(t.recorder.count("evicted"), 1);
    assert_eq!(t.stats().items_evicted, 1);
}

#[tokio::test]
async fn item_is_dropped_after_three_failed_cycles() {
    let t = TestEngine::new(game_config().with_retry_attempts(3));
    t.remote
        .fail_table("agents", RemoteError::Server { status: 503, message: "down".into() });
    t.enqueue(insert_op("agents", 1));

    let reports = [t.sync().await, t.sync().await, t.sync().await];
    assert_eq!(reports[0].requeued, 1);
    assert_eq!(reports[1].requeued, 1);
    assert_eq!((reports[2].processed, reports[2].failed), (0, 1));

    let status = t.status();
    assert_eq!(status.queue_length, 0);
    assert_eq!(status.status, SyncStatus::Error);
    assert_eq!(t.remote.mutations().len(), 3);
}

#[tokio::test]
async fn coming_online_triggers_exactly_one_flush_in_order() {
    let t = TestEngine::offline(game_config());
    t.enqueue(insert_op("agents", 1));
    t.enqueue(update_op("agents", 1, json!({"lvl": 2})));
    t.enqueue(delete_op("skills", 9));

    let driver = SyncDriver::new(Arc::clone(&t.engine)).spawn();
    // Let the driver reach its wait loop while still offline.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(t.recorder.count("sync-start"), 0);
    t.engine.set_online(true);

    assert!(t.recorder.wait_for("sync-complete", 1, WAIT).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(t.recorder.count("sync-start"), 1);

    let methods: Vec<_> = t.remote.mutations().iter().map(|c| c.method).collect();
    assert_eq!(methods, vec!["create", "update", "delete"]);
    assert_eq!(t.remote.rows("agents")[0]["lvl"], 2);
    assert_eq!(t.recorder.completions()[0].processed, 3);

    driver.shutdown().await;
}

#[tokio::test]
async fn realtime_delete_removes_row() {
    let t = TestEngine::new(game_config());
    t.cache()
        .replace(
            "agents",
            &json!([
                {"id": 3, "user_id": USER_ID},
                {"id": 5, "user_id": USER_ID},
                {"id": 7, "user_id": USER_ID}
            ]),
        )
        .unwrap();

    let listener = RealtimeListener::new(Arc::clone(&t.engine), t.push.clone());
    assert_eq!(listener.start().await, 5);

    t.push
        .emit(ChangeEvent::delete("agents", record(json!({"id": 5}))));
    assert!(t.recorder.wait_for("realtime", 1, WAIT).await);

    let ids: Vec<_> = t
        .cache()
        .collection("agents")
        .unwrap()
        .iter()
        .map(|r| r["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![3, 7]);
    listener.stop();
}

#[tokio::test]
async fn concurrent_sync_calls_are_single_flight() {
    let t = TestEngine::new(game_config());
    t.remote.set_latency(Duration::from_millis(30));
    t.enqueue(insert_op("agents", 1));
    t.enqueue(insert_op("agents", 2));

    let reports = concurrent_syncs(Arc::clone(&t.engine), 4).await;
    let busy: Vec<_> = reports.iter().filter(|r| **r != SyncReport::default()).collect();
    assert_eq!(busy.len(), 1);
    assert_eq!(busy[0].processed, 2);
    assert_eq!(t.remote.rows("agents").len(), 2);
}

#[tokio::test]
async fn round_trip_empties_queue_and_sets_last_sync() {
    let t = TestEngine::new(game_config());
    t.enqueue(insert_op("agents", 1));

    let report = t.sync().await;
    assert_eq!((report.processed, report.failed), (1, 0));

    let status = t.status();
    assert_eq!(status.queue_length, 0);
    assert_eq!(status.last_sync, Some(START_MILLIS));
    assert_eq!(status.status, SyncStatus::Idle);
    assert_eq!(t.recorder.names().last(), Some(&"sync-complete"));
}

#[tokio::test]
async fn queue_survives_restart() {
    let t = TestEngine::file(game_config());
    t.engine.set_online(false);
    t.enqueue(insert_op("agents", 1));
    t.enqueue(insert_op("agents", 2));
    t.clock.advance(Duration::from_secs(60));

    let t = t.restart();
    assert_eq!(queued_ids(&t), vec![1, 2]);
    let report = t.sync().await;
    assert_eq!(report.processed, 2);

    let t = t.restart();
    assert_eq!(t.status().queue_length, 0);
    assert_eq!(t.status().last_sync, Some(START_MILLIS + 60_000));
}

#[tokio::test]
async fn persistence_failure_keeps_queue_in_memory() {
    let store = Arc::new(FaultyStore::new());
    let t = TestEngine::with_store(game_config(), store.clone());
    t.engine.set_online(false);

    store.fail_writes(true);
    t.enqueue(insert_op("agents", 1));
    t.enqueue(insert_op("agents", 2));
    assert_eq!(t.status().queue_length, 2);
    assert!(!t.queue().is_persistent());

    store.fail_writes(false);
    t.engine.set_online(true);
    assert_eq!(t.sync().await.processed, 2);
    assert!(t.queue().is_persistent());
    assert_eq!(stored_queue(store.as_ref()).len(), 0);
}

#[tokio::test]
async fn write_failure_does_not_leave_stale_copy() {
    let store = Arc::new(FaultyStore::new());
    let t = TestEngine::with_store(game_config(), store.clone());
    t.engine.set_online(false);
    t.enqueue(insert_op("agents", 1));

    store.fail_writes(true);
    t.enqueue(insert_op("agents", 2));
    store.fail_writes(false);

    t.engine.set_online(true);
    assert_eq!(t.sync().await.processed, 2);
    drop(t);

    let restarted = TestEngine::with_store(game_config(), store.clone());
    assert_eq!(restarted.status().queue_length, 0);
    assert!(stored_queue(store.as_ref()).is_empty());
}

#[tokio::test]
async fn queued_items_stay_stored_during_flush() {
    let t = TestEngine::new(game_config());
    t.remote.set_latency(Duration::from_millis(100));
    for id in 1..=3 {
        t.enqueue(insert_op("agents", id));
    }

    let engine = Arc::clone(&t.engine);
    let flush = tokio::spawn(async move { engine.sync().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // First item still awaiting the remote: nothing settled yet.
    let ids: Vec<_> = stored_queue(t.store.as_ref())
        .iter()
        .map(|item| item.operation.data().unwrap()["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);

    assert_eq!(flush.await.unwrap().processed, 3);
    assert!(stored_queue(t.store.as_ref()).is_empty());
}

#[tokio::test]
async fn items_enqueued_during_flush_run_after_requeued_ones() {
    let t = TestEngine::new(game_config());
    t.remote.set_latency(Duration::from_millis(20));
    t.remote.fail_next(RemoteError::Timeout);
    t.enqueue(insert_op("agents", 1));

    let engine = Arc::clone(&t.engine);
    let flush = tokio::spawn(async move { engine.sync().await });
    tokio::time::sleep(Duration::from_millis(5)).await;
    t.enqueue(insert_op("agents", 2));

    let report = flush.await.unwrap();
    assert_eq!(report.requeued, 1);
    assert_eq!(queued_ids(&t), vec![1, 2]);
}

#[tokio::test]
async fn going_offline_mid_flush_stops_after_current_item() {
    let t = TestEngine::new(game_config());
    t.remote.set_latency(Duration::from_millis(30));
    for id in 1..=3 {
        t.enqueue(insert_op("agents", id));
    }

    let engine = Arc::clone(&t.engine);
    let flush = tokio::spawn(async move { engine.sync().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    t.engine.set_online(false);

    let report = flush.await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.deferred, 2);
    assert_eq!(queued_ids(&t), vec![2, 3]);
    assert_eq!(t.status().status, SyncStatus::Offline);
    assert!(t.pending().iter().all(|item| item.attempts == 0));
}

#[tokio::test]
async fn manual_conflict_keep_local_replays_pending_write() {
    let t = TestEngine::new(game_config().with_conflict_policy(ConflictPolicy::Manual));
    t.remote.seed(
        "business_state",
        vec![record(json!({"user_id": USER_ID, "cash": 500}))],
    );
    t.engine.set_online(false);
    let outcome = t
        .save("business_state", record(json!({"cash": 10})))
        .await
        .unwrap();
    assert!(matches!(outcome, SaveOutcome::Queued { .. }));

    t.engine.set_online(true);
    t.remote.fail_next(RemoteError::Timeout);
    t.sync().await;

    let conflicts = t.recorder.conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].local.as_ref().unwrap()["cash"], 10);
    assert_eq!(conflicts[0].server["cash"], 500);

    t.resolve_conflict(&conflicts[0], ConflictResolution::KeepLocal)
        .unwrap();
    t.sync().await;
    assert_eq!(t.remote.rows("business_state")[0]["cash"], 10);
    assert_eq!(t.cache().read("business_state").unwrap().unwrap()["cash"], 10);
}

#[tokio::test]
async fn server_wins_overwrites_pending_resource() {
    let t = TestEngine::new(game_config());
    t.remote
        .seed("game_state", vec![record(json!({"user_id": USER_ID, "xp": 99}))]);
    t.engine.set_online(false);
    t.save("game_state", record(json!({"xp": 1}))).await.unwrap();
    assert_eq!(t.cache().read("games_state").unwrap().unwrap()["xp"], 1);

    t.engine.set_online(true);
    t.remote.fail_next(RemoteError::Timeout);
    t.sync().await;

    assert_eq!(t.status().queue_length, 1);
    assert_eq!(t.cache().read("games_state").unwrap().unwrap()["xp"], 99);
}

#[tokio::test]
async fn signed_out_save_never_queues() {
    let t = TestEngine::new(game_config());
    t.identity.sign_out();

    let outcome = t
        .save("gamedev_state", record(json!({"studio": "tiny"})))
        .await
        .unwrap();
    assert_eq!(outcome, SaveOutcome::LocalOnly);
    assert_eq!(t.status().queue_length, 0);
    assert!(t.remote.calls().is_empty());
    assert_eq!(
        t.cache().read("gamedev_state").unwrap().unwrap()["studio"],
        "tiny"
    );
}

#[tokio::test]
async fn panicking_observer_does_not_stop_the_flush() {
    let t = TestEngine::new(game_config());
    t.subscribe(Arc::new(|event: &ebbsync_engine::SyncEvent| {
        if event.name() == "sync-start" {
            panic!("observer failure");
        }
    }));
    t.enqueue(insert_op("agents", 1));

    assert_eq!(t.sync().await.processed, 1);
    assert_eq!(t.recorder.count("sync-complete"), 1);
}

#[tokio::test]
async fn upsert_uses_conflict_column() {
    let t = TestEngine::new(game_config());
    let op = Operation::upsert_on(
        "game_state",
        record(json!({"user_id": USER_ID, "xp": 1})),
        "user_id",
    )
    .unwrap();
    t.enqueue(op.clone());
    t.enqueue(op);
    t.sync().await;

    assert_eq!(t.remote.rows("game_state").len(), 1);
    let call = &t.remote.mutations()[0];
    assert_eq!(call.method, "upsert");
}
