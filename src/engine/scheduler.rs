//! Startup synchronize and recurring backup ticks.
//!
//! One immediate synchronize runs at startup, concurrently with a fixed
//! interval that fires the backup flow. The scheduler itself never guards
//! against overlapping work; the engine's in-flight flag does, so a tick
//! that lands mid-synchronize is a cheap no-op.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::SyncEngine;
use crate::git::Repository;

/// Runs functions on their own thread of control: once, or repeatedly on
/// a fixed interval.
#[derive(Debug, Clone)]
pub struct Scheduler {
    shutdown: CancellationToken,
}

impl Scheduler {
    /// Creates a scheduler that stops its periodic tasks when `shutdown`
    /// is cancelled.
    pub fn new(shutdown: CancellationToken) -> Self {
        Scheduler { shutdown }
    }

    /// Fires `task` once, off the async runtime's worker threads.
    pub fn run_once<F>(&self, task: F) -> JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        tokio::spawn(async move {
            if tokio::task::spawn_blocking(task).await.is_err() {
                warn!("one-shot task panicked");
            }
        })
    }

    /// Fires `task` repeatedly on a fixed interval until shutdown.
    ///
    /// The first firing happens one full interval after the call. Ticks
    /// run serially and to completion; a tick in progress when shutdown
    /// arrives finishes before the task stops.
    pub fn run_periodically<F>(&self, task: F, every: Duration) -> JoinHandle<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let task = Arc::new(task);
            let start = tokio::time::Instant::now() + every;
            let mut ticker = tokio::time::interval_at(start, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("scheduler stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let task = Arc::clone(&task);
                        if tokio::task::spawn_blocking(move || task()).await.is_err() {
                            warn!("periodic task panicked");
                        }
                    }
                }
            }
        })
    }
}

/// Join handles for the engine's two scheduled flows.
pub struct EngineHandle {
    /// The startup synchronize task.
    pub synchronize: JoinHandle<()>,
    /// The recurring backup task.
    pub backup: JoinHandle<()>,
}

/// Starts the engine: one immediate synchronize plus a backup tick every
/// `interval`.
pub fn start<R>(
    engine: Arc<SyncEngine<R>>,
    interval: Duration,
    shutdown: CancellationToken,
) -> EngineHandle
where
    R: Repository + 'static,
{
    info!(interval_secs = interval.as_secs(), "starting sync engine");
    let scheduler = Scheduler::new(shutdown);

    let startup_engine = Arc::clone(&engine);
    let synchronize = scheduler.run_once(move || {
        let outcome = startup_engine.synchronize();
        debug!(?outcome, "startup synchronize finished");
    });

    let backup = scheduler.run_periodically(
        move || {
            let outcome = engine.backup();
            debug!(?outcome, "backup tick finished");
        },
        interval,
    );

    EngineHandle {
        synchronize,
        backup,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RepoHealth;
    use crate::test_utils::MockRepository;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[tokio::test]
    async fn run_once_fires_exactly_once() {
        let scheduler = Scheduler::new(CancellationToken::new());
        let count = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&count);
        scheduler
            .run_once(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn periodic_task_fires_until_shutdown() {
        let shutdown = CancellationToken::new();
        let scheduler = Scheduler::new(shutdown.clone());
        let count = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&count);
        let handle = scheduler.run_periodically(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(120)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let fired = count.load(Ordering::SeqCst);
        assert!(fired >= 1, "expected at least one tick, got {fired}");

        // No further ticks after shutdown.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), fired);
    }

    #[tokio::test]
    async fn start_runs_synchronize_then_backup_ticks() {
        let temp = TempDir::new().unwrap();
        let repo = MockRepository::new();
        let engine = Arc::new(SyncEngine::new(temp.path(), Arc::clone(&repo)));

        let record = json!({
            "timestamp": "2024-05-03T10:00:00+08:00",
            "msg": "scheduled",
        });
        engine.add_log(record.as_object().unwrap());

        let shutdown = CancellationToken::new();
        let handle = start(
            Arc::clone(&engine),
            Duration::from_millis(20),
            shutdown.clone(),
        );
        handle.synchronize.await.unwrap();
        assert_eq!(engine.health(), RepoHealth::Usable);

        // Wait for at least one backup tick to drain the buffer.
        for _ in 0..50 {
            if engine.pending_records() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(engine.pending_records(), 0);
        assert!(repo.pushes() >= 1);

        shutdown.cancel();
        handle.backup.await.unwrap();
    }
}
