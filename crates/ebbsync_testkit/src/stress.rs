//! Stress helpers for the engine.
//!
//! These helpers drive the engine from many tasks at once to check that
//! the queue bound and single-flight guard hold under contention.

use crate::fixtures::insert_op;
use ebbsync_engine::{SyncEngine, SyncReport};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressResult {
    /// Creates a new result.
    pub fn new(total_ops: usize, duration: Duration) -> Self {
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total_ops as f64 / duration.as_secs_f64()
        } else {
            0.0
        };
        Self {
            total_ops,
            duration,
            ops_per_second,
        }
    }
}

/// Enqueues `per_task` inserts on `table` from each of `tasks` tokio tasks.
///
/// Row ids are `task * per_task + n`, so every insert is distinct.
pub async fn concurrent_enqueues(
    engine: Arc<SyncEngine>,
    table: &'static str,
    tasks: usize,
    per_task: usize,
) -> StressResult {
    let start = Instant::now();
    let handles: Vec<_> = (0..tasks)
        .map(|task| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                for n in 0..per_task {
                    engine.enqueue(insert_op(table, (task * per_task + n) as i64));
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.expect("enqueue task panicked");
    }
    StressResult::new(tasks * per_task, start.elapsed())
}

/// Calls [`SyncEngine::sync`] from `callers` tasks at once and returns
/// every report.
pub async fn concurrent_syncs(engine: Arc<SyncEngine>, callers: usize) -> Vec<SyncReport> {
    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.sync().await })
        })
        .collect();

    let mut reports = Vec::with_capacity(callers);
    for handle in handles {
        reports.push(handle.await.expect("sync task panicked"));
    }
    reports
}

/// Flushes until the queue is empty or `max_rounds` flushes ran, and
/// returns the summed report.
pub async fn flush_until_empty(engine: &SyncEngine, max_rounds: usize) -> SyncReport {
    let mut total = SyncReport::default();
    for _ in 0..max_rounds {
        if engine.status().queue_length == 0 {
            break;
        }
        let report = engine.sync().await;
        total.processed += report.processed;
        total.failed += report.failed;
        total.requeued += report.requeued;
        total.deferred += report.deferred;
    }
    total
}
