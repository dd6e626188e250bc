//! The synchronize/backup engine.
//!
//! Two flows share this engine. `synchronize` pulls remote history and
//! merges externally-made changes into the buffer by parsing the diff
//! between the before/after revisions. `backup` writes buffered shards to
//! disk and pushes them. A backup tick that finds a synchronize in flight
//! defers to the next tick; that flag is the engine's only cross-flow
//! synchronization point.
//!
//! # Failure Semantics
//!
//! A failed remote operation never loses buffered records: the buffer is
//! cleared only after a confirmed push. The checkout is never left ahead
//! of a broken remote: every pull/push failure rolls the checkout back to
//! one revision behind current and marks the repository degraded until a
//! cycle succeeds again.

pub mod scheduler;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::buffer::ShardedBuffer;
use crate::clock;
use crate::diff;
use crate::git::Repository;
use crate::record;

/// Result of a synchronize flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Remote changes were merged into the buffer.
    Synced,
    /// The remote had nothing new.
    NoChange,
    /// The flow failed; recovery (if any) already ran.
    Failed,
}

/// Result of a backup flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupOutcome {
    /// Buffered shards were written and pushed; the buffer is now empty.
    Completed,
    /// The buffer held nothing; the tick was a no-op.
    NothingPending,
    /// A synchronize was in flight; deferred to the next tick.
    Deferred,
    /// The cycle failed; buffered records are retained for the next tick.
    Failed,
}

/// Usability of the backup repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoHealth {
    /// No clone has succeeded yet.
    NotCloned,
    /// The last cycle against the remote succeeded.
    Usable,
    /// A pull or push failed and the checkout was rolled back; kept until
    /// a cycle succeeds again.
    Degraded,
}

/// Orchestrates buffering, synchronization, and backup against one
/// repository.
pub struct SyncEngine<R: Repository> {
    repo: R,
    buffer: Mutex<ShardedBuffer>,
    health: Mutex<RepoHealth>,
    sync_running: AtomicBool,
}

impl<R: Repository> SyncEngine<R> {
    /// Creates an engine buffering under `backup_dir` and syncing through
    /// `repo`.
    pub fn new(backup_dir: impl Into<PathBuf>, repo: R) -> Self {
        SyncEngine {
            repo,
            buffer: Mutex::new(ShardedBuffer::new(backup_dir)),
            health: Mutex::new(RepoHealth::NotCloned),
            sync_running: AtomicBool::new(false),
        }
    }

    /// Buffers one log record; never fails.
    ///
    /// Returns the shard path the record was buffered into. Durability is
    /// best-effort: the record reaches the remote on the next successful
    /// backup cycle.
    pub fn add_log(&self, object: &Map<String, Value>) -> PathBuf {
        let record = record::coerce(object);
        let path = self.buffer.lock().add_record(record);
        trace!(path = %path.display(), "buffered record");
        path
    }

    /// Returns the current repository health.
    pub fn health(&self) -> RepoHealth {
        *self.health.lock()
    }

    /// Returns the number of buffered records.
    pub fn pending_records(&self) -> usize {
        self.buffer.lock().total_records()
    }

    /// Pulls the remote and merges its changes into the buffer.
    #[instrument(skip(self))]
    pub fn synchronize(&self) -> SyncOutcome {
        let Some(_guard) = InFlightGuard::acquire(&self.sync_running) else {
            debug!("synchronize already in flight");
            return SyncOutcome::Failed;
        };
        self.synchronize_locked()
    }

    fn synchronize_locked(&self) -> SyncOutcome {
        if self.health() == RepoHealth::NotCloned {
            if let Err(e) = self.repo.ensure_cloned() {
                warn!(error = %e, "clone failed, repository stays unusable");
                return SyncOutcome::Failed;
            }
            info!("backup repository cloned");
            self.set_health(RepoHealth::Usable);
        }

        let before = match self.repo.current_revision() {
            Ok(rev) => rev,
            Err(e) => {
                warn!(error = %e, "failed to read revision before pull");
                return SyncOutcome::Failed;
            }
        };

        if let Err(e) = self.repo.pull() {
            warn!(error = %e, "pull failed, rolling back");
            self.roll_back();
            return SyncOutcome::Failed;
        }

        let after = match self.repo.current_revision() {
            Ok(rev) => rev,
            Err(e) => {
                warn!(error = %e, "failed to read revision after pull");
                return SyncOutcome::Failed;
            }
        };
        if after == before {
            debug!(revision = %after.short(), "remote unchanged");
            return SyncOutcome::NoChange;
        }

        let text = match self.repo.diff(&before, &after) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "failed to compute diff");
                return SyncOutcome::Failed;
            }
        };
        // An unparsable diff means "diff unavailable", never "no changes".
        let files = match diff::parse_repo_diff(&text) {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "diff unavailable");
                return SyncOutcome::Failed;
            }
        };
        if files.is_empty() {
            debug!(
                before = %before.short(),
                after = %after.short(),
                "empty diff between distinct revisions"
            );
        }

        let mut buffer = self.buffer.lock();
        for (name, changes) in &files {
            buffer.apply_changes(Path::new(name), changes);
        }
        drop(buffer);

        info!(
            before = %before.short(),
            after = %after.short(),
            files = files.len(),
            "merged remote changes"
        );
        self.set_health(RepoHealth::Usable);
        SyncOutcome::Synced
    }

    /// Writes buffered shards to disk and pushes them to the remote.
    #[instrument(skip(self))]
    pub fn backup(&self) -> BackupOutcome {
        if self.buffer.lock().is_empty() {
            trace!("nothing buffered");
            return BackupOutcome::NothingPending;
        }
        if self.sync_running.load(Ordering::Acquire) {
            debug!("synchronize in flight, deferring backup to the next tick");
            return BackupOutcome::Deferred;
        }

        if self.synchronize() == SyncOutcome::Failed {
            warn!("synchronize failed, aborting backup");
            return BackupOutcome::Failed;
        }

        {
            let buffer = self.buffer.lock();
            match buffer.write_all() {
                Ok(count) => debug!(shards = count, "wrote buffered shards"),
                Err(e) => {
                    error!(error = %e, "failed to write shards");
                    return BackupOutcome::Failed;
                }
            }
        }

        let message = format!("Updated at {}", clock::reference_now());
        match self.repo.push(&message) {
            Ok(outcome) => {
                self.buffer.lock().clear();
                self.set_health(RepoHealth::Usable);
                info!(?outcome, "backup complete");
                BackupOutcome::Completed
            }
            Err(e) => {
                // Buffered records are kept; the next tick retries.
                warn!(error = %e, "push failed, rolling back");
                self.roll_back();
                BackupOutcome::Failed
            }
        }
    }

    /// The universal recovery action: move the checkout one revision
    /// behind current and mark the repository degraded.
    fn roll_back(&self) {
        match self.repo.hard_reset_back_one() {
            Ok(()) => info!("rolled checkout back one revision"),
            Err(e) => error!(error = %e, "rollback failed"),
        }
        self.set_health(RepoHealth::Degraded);
    }

    fn set_health(&self, health: RepoHealth) {
        *self.health.lock() = health;
    }
}

/// RAII acquisition of the synchronize-in-flight flag.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            .then_some(InFlightGuard { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockRepository;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn engine(temp: &TempDir, repo: &Arc<MockRepository>) -> SyncEngine<Arc<MockRepository>> {
        SyncEngine::new(temp.path(), Arc::clone(repo))
    }

    fn sample_record() -> Map<String, Value> {
        json!({
            "timestamp": "2024-05-03T10:00:00+08:00",
            "msg": "hello",
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn backup_with_empty_buffer_is_trivial() {
        let temp = TempDir::new().unwrap();
        let repo = MockRepository::new();
        let engine = engine(&temp, &repo);

        assert_eq!(engine.backup(), BackupOutcome::NothingPending);
        assert_eq!(repo.pushes(), 0);
    }

    #[test]
    fn backup_defers_while_synchronize_in_flight() {
        let temp = TempDir::new().unwrap();
        let repo = MockRepository::new();
        let engine = engine(&temp, &repo);

        let path = engine.add_log(&sample_record());
        engine.sync_running.store(true, Ordering::Release);

        assert_eq!(engine.backup(), BackupOutcome::Deferred);
        assert_eq!(repo.pushes(), 0, "deferred tick must not push");
        assert!(!path.exists(), "deferred tick must not write files");
        assert_eq!(engine.pending_records(), 1);

        engine.sync_running.store(false, Ordering::Release);
    }

    #[test]
    fn failed_push_keeps_buffer_then_healthy_backup_clears_it() {
        let temp = TempDir::new().unwrap();
        let repo = MockRepository::new();
        let engine = engine(&temp, &repo);

        engine.add_log(&sample_record());
        repo.fail_push.store(true, Ordering::SeqCst);

        assert_eq!(engine.backup(), BackupOutcome::Failed);
        assert_eq!(engine.pending_records(), 1, "buffer kept on failure");
        assert_eq!(repo.resets(), 1, "rollback attempted");
        assert_eq!(engine.health(), RepoHealth::Degraded);

        // The remote recovers; the next tick retries from scratch.
        repo.fail_push.store(false, Ordering::SeqCst);
        assert_eq!(engine.backup(), BackupOutcome::Completed);
        assert_eq!(engine.pending_records(), 0);
        assert_eq!(engine.health(), RepoHealth::Usable);
    }

    #[test]
    fn backup_writes_shard_files() {
        let temp = TempDir::new().unwrap();
        let repo = MockRepository::new();
        let engine = engine(&temp, &repo);

        let path = engine.add_log(&sample_record());
        assert_eq!(engine.backup(), BackupOutcome::Completed);
        assert!(path.exists());
        assert_eq!(repo.pushes(), 1);
    }

    #[test]
    fn synchronize_with_unchanged_remote_is_a_no_op() {
        let temp = TempDir::new().unwrap();
        let repo = MockRepository::new();
        let engine = engine(&temp, &repo);

        assert_eq!(engine.synchronize(), SyncOutcome::NoChange);
        assert_eq!(engine.health(), RepoHealth::Usable);
    }

    #[test]
    fn synchronize_merges_remote_lines_into_buffered_shard() {
        let temp = TempDir::new().unwrap();
        let repo = MockRepository::new();
        let engine = engine(&temp, &repo);

        let path = engine.add_log(&sample_record());
        let rel = path
            .strip_prefix(temp.path())
            .unwrap()
            .to_string_lossy()
            .into_owned();

        repo.advance_on_pull("rev-2");
        repo.set_diff(format!(
            "diff --git a/{rel} b/{rel}\n\
             --- a/{rel}\n\
             +++ b/{rel}\n\
             @@ -1,1 +1,2 @@\n \
             {{}}\n\
             +{{\"timestamp\": \"2024-05-03T10:00:00+08:00\", \"msg\": \"remote\"}}\n"
        ));

        assert_eq!(engine.synchronize(), SyncOutcome::Synced);
        assert_eq!(engine.pending_records(), 2);
    }

    #[test]
    fn synchronize_ignores_changes_to_unbuffered_files() {
        let temp = TempDir::new().unwrap();
        let repo = MockRepository::new();
        let engine = engine(&temp, &repo);

        repo.advance_on_pull("rev-2");
        repo.set_diff(
            "diff --git a/2030/1/1/ff.json b/2030/1/1/ff.json\n\
             --- a/2030/1/1/ff.json\n\
             +++ b/2030/1/1/ff.json\n\
             @@ -1,1 +1,2 @@\n \
             {}\n\
             +{\"msg\": \"elsewhere\"}\n",
        );

        assert_eq!(engine.synchronize(), SyncOutcome::Synced);
        assert_eq!(engine.pending_records(), 0);
    }

    #[test]
    fn pull_failure_rolls_back_and_fails() {
        let temp = TempDir::new().unwrap();
        let repo = MockRepository::new();
        let engine = engine(&temp, &repo);

        repo.fail_pull.store(true, Ordering::SeqCst);
        assert_eq!(engine.synchronize(), SyncOutcome::Failed);
        assert_eq!(repo.resets(), 1);
        assert_eq!(engine.health(), RepoHealth::Degraded);
    }

    #[test]
    fn clone_failure_is_terminal_for_the_attempt() {
        let temp = TempDir::new().unwrap();
        let repo = MockRepository::new();
        let engine = engine(&temp, &repo);

        repo.fail_clone.store(true, Ordering::SeqCst);
        assert_eq!(engine.synchronize(), SyncOutcome::Failed);
        assert_eq!(engine.health(), RepoHealth::NotCloned);
        assert_eq!(repo.resets(), 0, "no rollback before a clone exists");
    }

    #[test]
    fn unparsable_diff_fails_the_synchronize() {
        let temp = TempDir::new().unwrap();
        let repo = MockRepository::new();
        let engine = engine(&temp, &repo);

        repo.advance_on_pull("rev-2");
        repo.set_diff("diff --git a/x.json b/x.json\n--- a/x.json\n+++ b/x.json\n@@ bad @@\n");

        assert_eq!(engine.synchronize(), SyncOutcome::Failed);
    }

    #[test]
    fn failed_synchronize_aborts_the_backup_tick() {
        let temp = TempDir::new().unwrap();
        let repo = MockRepository::new();
        let engine = engine(&temp, &repo);

        engine.add_log(&sample_record());
        repo.fail_pull.store(true, Ordering::SeqCst);

        assert_eq!(engine.backup(), BackupOutcome::Failed);
        assert_eq!(repo.pushes(), 0, "aborted tick must not push");
        assert_eq!(engine.pending_records(), 1);
    }
}
