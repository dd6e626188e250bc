//! The engine's contract with the remote store, and its git-backed
//! implementation.
//!
//! [`Repository`] is the seam the sync engine is generic over; tests drive
//! the engine with scripted implementations while production uses
//! [`GitRepository`], which shells out to `git` against a local checkout of
//! the backup repository.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use super::{GitError, GitResult, git_command, run_git, run_git_stdout};
use crate::types::Revision;

/// Marker the remote emits when its LFS locking API is absent.
const LFS_LOCKING_MARKER: &str = "does not support the Git LFS locking API";

/// Name of the environment variable holding the remote credential.
pub const DEFAULT_TOKEN_VAR: &str = "db_token";

/// Result of a push operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// New commits were pushed to the remote.
    Pushed,
    /// The remote already had everything; nothing was sent.
    NothingToPush,
}

/// Contract over the remote version-controlled store.
///
/// All operations return typed errors; the engine treats every failure as
/// non-fatal and recovers per its own state machine. Implementations must
/// be callable from any thread.
pub trait Repository: Send + Sync {
    /// Clones the remote on first use; idempotent once a checkout exists.
    fn ensure_cloned(&self) -> GitResult<()>;

    /// Returns the revision the local checkout is at.
    ///
    /// Fails with [`GitError::NotARepository`] when the working copy is not
    /// a valid checkout and [`GitError::CommandFailed`] on any execution
    /// error; callers treat both the same way.
    fn current_revision(&self) -> GitResult<Revision>;

    /// Pulls remote history into the checkout.
    ///
    /// Only safe to call when the checkout has no pending uncommitted
    /// application writes; the engine always pulls before it produces new
    /// shard files.
    fn pull(&self) -> GitResult<()>;

    /// Stages all changes, commits with `message`, and pushes.
    ///
    /// Fails with [`GitError::Rejected`] when the remote history has
    /// diverged. A missing LFS locking API is handled by disabling lock
    /// verification and retrying once before the error propagates.
    fn push(&self, message: &str) -> GitResult<PushOutcome>;

    /// Returns the unified diff text between two revisions.
    fn diff(&self, before: &Revision, after: &Revision) -> GitResult<String>;

    /// Returns the unified diff text between two revisions, restricted to
    /// one path.
    fn diff_file(&self, before: &Revision, after: &Revision, path: &Path) -> GitResult<String>;

    /// Discards all uncommitted changes and moves the checkout one
    /// revision behind its current position.
    ///
    /// This is the engine's only recovery action; no other reset target is
    /// ever used.
    fn hard_reset_back_one(&self) -> GitResult<()>;

    /// Sets a local configuration value on the checkout.
    fn set_config(&self, key: &str, value: &str) -> GitResult<()>;
}

/// Identity used for creating backup commits.
///
/// Passed via `-c` flags so commits work even when global/system git
/// config is disabled.
#[derive(Debug, Clone)]
pub struct CommitIdentity {
    /// The committer/author name (git `user.name`).
    pub name: String,

    /// The committer/author email (git `user.email`).
    pub email: String,
}

impl Default for CommitIdentity {
    fn default() -> Self {
        CommitIdentity {
            name: "shardlog".to_string(),
            email: "shardlog@localhost".to_string(),
        }
    }
}

/// A [`Repository`] backed by the `git` binary and a local checkout.
#[derive(Debug, Clone)]
pub struct GitRepository {
    root: PathBuf,
    remote_url: String,
    token_var: String,
    identity: CommitIdentity,
}

impl GitRepository {
    /// Creates a handle for a checkout that may not exist yet.
    ///
    /// No I/O happens here; [`Repository::ensure_cloned`] performs the
    /// initial clone on first use.
    pub fn new(root: impl Into<PathBuf>, remote_url: impl Into<String>) -> Self {
        GitRepository {
            root: root.into(),
            remote_url: remote_url.into(),
            token_var: DEFAULT_TOKEN_VAR.to_string(),
            identity: CommitIdentity::default(),
        }
    }

    /// Opens an existing checkout, failing when `root` is not the toplevel
    /// of one.
    pub fn open(root: impl Into<PathBuf>, remote_url: impl Into<String>) -> GitResult<Self> {
        let repo = GitRepository::new(root, remote_url);
        repo.require_checkout()?;
        Ok(repo)
    }

    /// Overrides the environment variable the credential is read from.
    pub fn with_token_var(mut self, var: impl Into<String>) -> Self {
        self.token_var = var.into();
        self
    }

    /// Overrides the commit identity.
    pub fn with_identity(mut self, identity: CommitIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Returns the checkout root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns true if `root` is the toplevel of a valid checkout.
    fn is_checkout(&self) -> bool {
        if !self.root.exists() {
            return false;
        }
        let Ok(toplevel) = run_git_stdout(&self.root, &["rev-parse", "--show-toplevel"]) else {
            return false;
        };
        match (
            std::fs::canonicalize(&toplevel),
            std::fs::canonicalize(&self.root),
        ) {
            (Ok(found), Ok(expected)) => found == expected,
            _ => false,
        }
    }

    fn require_checkout(&self) -> GitResult<()> {
        if self.is_checkout() {
            Ok(())
        } else {
            Err(GitError::NotARepository {
                path: self.root.clone(),
            })
        }
    }

    /// Splices the credential from the environment into an HTTPS remote
    /// URL. Non-HTTPS URLs and a missing credential pass through.
    fn authenticated_url(&self) -> String {
        let Ok(token) = std::env::var(&self.token_var) else {
            return self.remote_url.clone();
        };
        if token.is_empty() {
            return self.remote_url.clone();
        }
        match self.remote_url.strip_prefix("https://") {
            Some(rest) => format!("https://{token}@{rest}"),
            None => self.remote_url.clone(),
        }
    }

    /// The config key that disables LFS lock verification for this remote.
    fn lfs_locksverify_key(&self) -> String {
        format!("lfs.{}/info/lfs.locksverify", self.remote_url)
    }

    /// A git Command with the commit identity applied via `-c` flags.
    fn commit_command(&self) -> Command {
        let mut cmd = git_command(&self.root);
        cmd.arg("-c");
        cmd.arg(format!("user.name={}", self.identity.name));
        cmd.arg("-c");
        cmd.arg(format!("user.email={}", self.identity.email));
        cmd
    }

    /// Commits staged changes; a clean tree is not an error.
    fn commit(&self, message: &str) -> GitResult<()> {
        let output = self
            .commit_command()
            .args(["commit", "-m", message])
            .output()?;
        if output.status.success() {
            return Ok(());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stdout.contains("nothing to commit") || stderr.contains("nothing to commit") {
            debug!("working tree clean, nothing to commit");
            return Ok(());
        }
        Err(GitError::CommandFailed {
            command: "git commit".to_string(),
            stderr: stderr.to_string(),
        })
    }

    /// Pushes HEAD to origin, classifying the failure modes the engine
    /// recovers from.
    fn push_head(&self) -> GitResult<PushOutcome> {
        let output = git_command(&self.root)
            .args(["push", "origin", "HEAD"])
            .output()?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            if stdout.contains("Everything up-to-date") || stderr.contains("Everything up-to-date")
            {
                return Ok(PushOutcome::NothingToPush);
            }
            return Ok(PushOutcome::Pushed);
        }

        if stderr.contains(LFS_LOCKING_MARKER) {
            return Err(GitError::LockingUnsupported {
                details: stderr.to_string(),
            });
        }
        if stderr.contains("non-fast-forward")
            || stderr.contains("rejected")
            || stderr.contains("failed to push")
        {
            return Err(GitError::Rejected {
                details: stderr.to_string(),
            });
        }
        Err(GitError::CommandFailed {
            command: "git push origin HEAD".to_string(),
            stderr: stderr.to_string(),
        })
    }
}

impl Repository for GitRepository {
    fn ensure_cloned(&self) -> GitResult<()> {
        if self.is_checkout() {
            return Ok(());
        }

        info!(
            url = %self.remote_url,
            dest = %self.root.display(),
            "cloning backup repository"
        );
        let parent = self
            .root
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent)?;

        let url = self.authenticated_url();
        let dest = self.root.to_string_lossy();
        run_git(parent, &["clone", &url, dest.as_ref()])?;
        Ok(())
    }

    fn current_revision(&self) -> GitResult<Revision> {
        self.require_checkout()?;
        let sha = run_git_stdout(&self.root, &["rev-parse", "HEAD"])?;
        Ok(Revision::new(sha))
    }

    fn pull(&self) -> GitResult<()> {
        self.require_checkout()?;
        match run_git(&self.root, &["pull"]) {
            Ok(_) => Ok(()),
            Err(GitError::CommandFailed { stderr, .. }) if stderr.contains(LFS_LOCKING_MARKER) => {
                // Disable lock verification so the next cycle can proceed;
                // this call still fails.
                warn!("remote lacks LFS locking support, disabling lock verification");
                if let Err(e) = self.set_config(&self.lfs_locksverify_key(), "false") {
                    warn!(error = %e, "failed to disable LFS lock verification");
                }
                Err(GitError::LockingUnsupported { details: stderr })
            }
            Err(e) => Err(e),
        }
    }

    fn push(&self, message: &str) -> GitResult<PushOutcome> {
        self.require_checkout()?;
        run_git(&self.root, &["add", "-A"])?;
        self.commit(message)?;

        match self.push_head() {
            Err(GitError::LockingUnsupported { details }) => {
                warn!(
                    details = %details,
                    "remote lacks LFS locking support, disabling lock verification and retrying"
                );
                self.set_config(&self.lfs_locksverify_key(), "false")?;
                self.push_head()
            }
            other => other,
        }
    }

    fn diff(&self, before: &Revision, after: &Revision) -> GitResult<String> {
        self.require_checkout()?;
        let output = run_git(&self.root, &["diff", before.as_str(), after.as_str()])?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn diff_file(&self, before: &Revision, after: &Revision, path: &Path) -> GitResult<String> {
        self.require_checkout()?;
        let path = path.to_string_lossy();
        let output = run_git(
            &self.root,
            &["diff", before.as_str(), after.as_str(), "--", path.as_ref()],
        )?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn hard_reset_back_one(&self) -> GitResult<()> {
        self.require_checkout()?;
        // Track and stage everything first so the reset also discards
        // untracked files left by an interrupted flush.
        run_git(&self.root, &["add", "-A"])?;
        run_git(&self.root, &["reset", "--hard", "HEAD^"])?;
        Ok(())
    }

    fn set_config(&self, key: &str, value: &str) -> GitResult<()> {
        self.require_checkout()?;
        run_git(&self.root, &["config", key, value])?;
        Ok(())
    }
}
