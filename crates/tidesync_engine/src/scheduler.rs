//! Periodic background sync.

use crate::state::SyncEngine;
use crate::transport::SyncTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Spawns the tick loop that drives [`SyncEngine`] sessions.
pub struct SyncScheduler;

impl SyncScheduler {
    /// Starts ticking `engine` every `interval` on the current runtime.
    ///
    /// Sessions run on the blocking pool. A tick that fires while a
    /// session is still running is skipped.
    pub fn spawn<T: SyncTransport + 'static>(
        engine: Arc<SyncEngine<T>>,
        interval: Duration,
    ) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let trigger = Arc::new(Notify::new());
        let wake = Arc::clone(&trigger);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(interval_ms = interval.as_millis() as u64, "sync scheduler started");

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                    _ = ticker.tick() => {}
                    _ = wake.notified() => {}
                }

                let engine = Arc::clone(&engine);
                match tokio::task::spawn_blocking(move || engine.tick()).await {
                    Ok(Ok(Some(_))) => {}
                    Ok(Ok(None)) => tracing::debug!("scheduled tick skipped"),
                    Ok(Err(e)) => tracing::debug!(error = %e, "scheduled session failed"),
                    Err(e) => tracing::error!(error = %e, "sync session panicked"),
                }
            }

            tracing::info!("sync scheduler stopped");
        });

        SchedulerHandle {
            shutdown: shutdown_tx,
            trigger,
            task,
        }
    }
}

/// Control handle for a running scheduler.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    trigger: Arc<Notify>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Requests a tick without waiting for the interval.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Returns true once the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the loop and waits for an in-flight session to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "sync scheduler task failed");
        }
    }
}
