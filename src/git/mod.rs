//! Git plumbing for the backup repository.
//!
//! This module wraps the `git` binary with a clean, non-interactive
//! environment and classifies its failures into the error taxonomy the
//! sync engine recovers from. The engine itself talks to the repository
//! through the [`Repository`] trait in [`repository`].

pub mod repository;

pub use repository::{GitRepository, PushOutcome, Repository};

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use thiserror::Error;

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The local working copy is not a valid checkout.
    #[error("not a repository: {}", path.display())]
    NotARepository { path: PathBuf },

    /// Git command failed.
    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Push was rejected (non-fast-forward).
    #[error("push rejected: {details}")]
    Rejected { details: String },

    /// The remote does not support the LFS locking API.
    #[error("remote does not support the LFS locking API: {details}")]
    LockingUnsupported { details: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// Create a git Command with clean environment (no system/user config).
///
/// This ensures consistent behavior across different machines by ignoring
/// system and user git configuration, and prevents hangs on auth prompts.
pub(crate) fn git_command(workdir: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(workdir);

    cmd.env("GIT_CONFIG_NOSYSTEM", "1");
    cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
    cmd.env("GIT_TERMINAL_PROMPT", "0");

    cmd
}

/// Run a git command in the given working directory.
///
/// Returns the command output on success, or a [`GitError`] on failure.
pub fn run_git(workdir: &Path, args: &[&str]) -> GitResult<Output> {
    let output = git_command(workdir).args(args).output()?;

    if output.status.success() {
        Ok(output)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let command = format!("git {}", args.join(" "));
        Err(GitError::CommandFailed { command, stderr })
    }
}

/// Run a git command and return stdout as a trimmed string.
pub fn run_git_stdout(workdir: &Path, args: &[&str]) -> GitResult<String> {
    let output = run_git(workdir, args)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
