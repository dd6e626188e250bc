//! Structured parsing of unified-diff text.
//!
//! The synchronize flow learns what changed between two revisions from the
//! textual diff alone, without re-reading whole files. This module turns
//! that text into per-file [`FileChanges`]: a new/deleted/renamed marker
//! and line-indexed maps of added and removed lines.
//!
//! Two entry points with distinct result types:
//! - [`parse_repo_diff`] for whole-repository diffs (one entry per file)
//! - [`parse_file_diff`] for a diff restricted to a single path

mod parse;

pub use parse::{parse_file_diff, parse_repo_diff};

use std::collections::BTreeMap;

use thiserror::Error;

/// Errors from diff parsing.
///
/// A parse failure means "diff unavailable", never "no changes"; callers
/// must fail their own operation rather than proceed.
#[derive(Debug, Error)]
pub enum DiffError {
    /// A `diff --git` header line did not match the expected shape.
    #[error("malformed file header: {line}")]
    MalformedFileHeader { line: String },

    /// A `@@` hunk header line did not match the expected shape.
    #[error("malformed hunk header: {line}")]
    MalformedHunkHeader { line: String },
}

/// Result type for diff parsing.
pub type DiffResult<T> = Result<T, DiffError>;

/// How a file section changed, when it did not change in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    /// The file did not exist before these revisions.
    NewFile,
    /// The file no longer exists after these revisions.
    DeletedFile,
    /// The file was renamed to the given path.
    RenamedTo(String),
}

/// The parsed changes for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileChanges {
    /// Set when the file was created, deleted, or renamed. When set, the
    /// line maps are empty: the section body is not parsed past the marker.
    pub kind: Option<ChangeKind>,

    /// Added lines, keyed by their line number in the "after" version.
    pub added: BTreeMap<u64, String>,

    /// Removed lines, keyed by their line number in the "before" version.
    pub removed: BTreeMap<u64, String>,
}

impl FileChanges {
    /// An empty change set.
    pub fn new() -> Self {
        FileChanges::default()
    }

    /// A change set carrying only a marker.
    pub fn with_kind(kind: ChangeKind) -> Self {
        FileChanges {
            kind: Some(kind),
            ..FileChanges::default()
        }
    }

    /// Returns true if nothing was recorded for this file.
    pub fn is_empty(&self) -> bool {
        self.kind.is_none() && self.added.is_empty() && self.removed.is_empty()
    }
}
