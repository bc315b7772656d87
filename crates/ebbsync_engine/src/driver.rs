//! Background scheduling of flushes.

use crate::engine::SyncEngine;
use crate::state::SyncReport;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Runs flushes for an engine on a tokio task.
///
/// A flush runs:
/// - at startup, when online with a non-empty queue
/// - every `sync_interval`
/// - when requested through [`SyncEngine::request_flush`] (enqueue and
///   coming back online both request one)
/// - after the retry delay, when a flush left failed items in the queue
/// - right away, when a flush stopped at the batch limit
///
/// The optional connectivity signal is applied with
/// [`SyncEngine::set_online`].
pub struct SyncDriver {
    engine: Arc<SyncEngine>,
    connectivity: Option<watch::Receiver<bool>>,
}

impl SyncDriver {
    /// Creates a driver for `engine`.
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self {
            engine,
            connectivity: None,
        }
    }

    /// Follows a connectivity signal (`true` = online).
    pub fn with_connectivity(mut self, connectivity: watch::Receiver<bool>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    /// Starts the driver on the current tokio runtime.
    pub fn spawn(self) -> DriverHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(shutdown_rx));
        DriverHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let engine = self.engine;
        let mut connectivity = self.connectivity;
        let mut signal_open = connectivity.is_some();

        if let Some(rx) = connectivity.as_mut() {
            let online = *rx.borrow_and_update();
            engine.set_online(online);
        }

        let mut retry_at = None;
        if engine.is_online() && !engine.queue().is_empty() {
            let report = engine.sync().await;
            retry_at = next_flush(&engine, &report);
        }

        let period = engine.config().sync_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = period.as_millis() as u64, "sync driver started");

        loop {
            let signal = if signal_open {
                connectivity.as_mut()
            } else {
                None
            };

            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    debug!("periodic flush");
                }
                _ = engine.flush_requested() => {
                    debug!("requested flush");
                }
                _ = sleep_until(retry_at) => {
                    debug!("retry flush");
                }
                changed = next_signal(signal) => {
                    match changed {
                        Some(online) => {
                            engine.set_online(online);
                        }
                        None => {
                            debug!("connectivity signal closed");
                            signal_open = false;
                        }
                    }
                    continue;
                }
            }

            let report = engine.sync().await;
            retry_at = next_flush(&engine, &report);
        }

        info!("sync driver stopped");
    }
}

fn next_flush(engine: &SyncEngine, report: &SyncReport) -> Option<Instant> {
    if report.deferred > 0 && engine.is_online() {
        return Some(Instant::now());
    }
    report.retry_after.map(|delay| Instant::now() + delay)
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_signal(signal: Option<&mut watch::Receiver<bool>>) -> Option<bool> {
    match signal {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(*rx.borrow_and_update()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

/// Handle to a running [`SyncDriver`].
///
/// Dropping the handle also stops the driver.
pub struct DriverHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl DriverHandle {
    /// Stops the driver and waits for it to exit.
    ///
    /// A flush in progress is allowed to finish first.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }

    /// Returns true once the driver task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
