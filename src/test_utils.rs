//! Shared test helpers.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::git::{GitError, GitResult, PushOutcome, Repository};
use crate::types::Revision;

/// A scripted [`Repository`]: revisions, diff text, and failure switches
/// are set by the test; calls are counted.
#[derive(Default)]
pub struct MockRepository {
    revision: Mutex<Revision>,
    pull_target: Mutex<Option<Revision>>,
    diff_text: Mutex<String>,
    pub fail_clone: AtomicBool,
    pub fail_pull: AtomicBool,
    pub fail_push: AtomicBool,
    pushes: AtomicUsize,
    resets: AtomicUsize,
}

impl MockRepository {
    pub fn new() -> Arc<Self> {
        let mock = MockRepository::default();
        *mock.revision.lock() = Revision::new("rev-1");
        Arc::new(mock)
    }

    /// Makes the next pull move the checkout to `rev`.
    pub fn advance_on_pull(&self, rev: &str) {
        *self.pull_target.lock() = Some(Revision::new(rev));
    }

    pub fn set_diff(&self, text: impl Into<String>) {
        *self.diff_text.lock() = text.into();
    }

    pub fn pushes(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

impl Repository for Arc<MockRepository> {
    fn ensure_cloned(&self) -> GitResult<()> {
        if self.fail_clone.load(Ordering::SeqCst) {
            return Err(GitError::CommandFailed {
                command: "git clone".to_string(),
                stderr: "network down".to_string(),
            });
        }
        Ok(())
    }

    fn current_revision(&self) -> GitResult<Revision> {
        Ok(self.revision.lock().clone())
    }

    fn pull(&self) -> GitResult<()> {
        if self.fail_pull.load(Ordering::SeqCst) {
            return Err(GitError::CommandFailed {
                command: "git pull".to_string(),
                stderr: "conflict".to_string(),
            });
        }
        if let Some(next) = self.pull_target.lock().take() {
            *self.revision.lock() = next;
        }
        Ok(())
    }

    fn push(&self, _message: &str) -> GitResult<PushOutcome> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        if self.fail_push.load(Ordering::SeqCst) {
            return Err(GitError::Rejected {
                details: "non-fast-forward".to_string(),
            });
        }
        Ok(PushOutcome::Pushed)
    }

    fn diff(&self, _before: &Revision, _after: &Revision) -> GitResult<String> {
        Ok(self.diff_text.lock().clone())
    }

    fn diff_file(&self, _before: &Revision, _after: &Revision, _path: &Path) -> GitResult<String> {
        Ok(String::new())
    }

    fn hard_reset_back_one(&self) -> GitResult<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_config(&self, _key: &str, _value: &str) -> GitResult<()> {
        Ok(())
    }
}
