//! In-memory buffer of shard files.
//!
//! The buffer owns every shard it has touched for its whole lifetime: a
//! shard file is loaded from disk the first time a record lands in it and
//! is only re-read after the buffer is cleared. Writers never block on
//! network I/O here; the sync engine decides when buffered shards reach
//! disk and the remote.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::diff::FileChanges;
use crate::record::{self, LogRecord};

/// Errors from shard file I/O.
#[derive(Debug, Error)]
pub enum ShardError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for shard operations.
pub type Result<T> = std::result::Result<T, ShardError>;

/// An ordered sequence of records backed by one shard file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Shard {
    records: Vec<LogRecord>,
}

impl Shard {
    /// An empty shard.
    pub fn new() -> Self {
        Shard::default()
    }

    /// Loads a shard from its file (one JSON array of record objects).
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let records: Vec<LogRecord> = serde_json::from_slice(&bytes)?;
        Ok(Shard { records })
    }

    /// Writes the shard to `path`, creating parent directories.
    ///
    /// The serialization is deterministic (pretty-printed array, fields in
    /// name order), so rewriting an unchanged shard produces an identical
    /// file and the remote diff stays minimal.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(&self.records)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Appends a record.
    pub fn push(&mut self, record: LogRecord) {
        self.records.push(record);
    }

    /// Returns the buffered records.
    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    /// Returns the number of buffered records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the shard holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The in-memory mapping from shard path to shard contents.
#[derive(Debug)]
pub struct ShardedBuffer {
    backup_dir: PathBuf,
    shards: BTreeMap<PathBuf, Shard>,
}

impl ShardedBuffer {
    /// Creates an empty buffer rooted at `backup_dir`.
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        ShardedBuffer {
            backup_dir: backup_dir.into(),
            shards: BTreeMap::new(),
        }
    }

    /// Buffers one record, returning the shard path it landed in.
    ///
    /// The target shard is loaded from disk the first time it is touched.
    /// A shard file that exists but cannot be read degrades to an empty
    /// shard with a warning; appending never fails upward.
    pub fn add_record(&mut self, record: LogRecord) -> PathBuf {
        let path = record::shard_path(&self.backup_dir, &record);
        self.shard_entry(path.clone()).push(record);
        path
    }

    /// Returns the buffered shard for `path`, loading it on first touch.
    fn shard_entry(&mut self, path: PathBuf) -> &mut Shard {
        self.shards.entry(path).or_insert_with_key(|path| {
            if path.exists() {
                match Shard::load(path) {
                    Ok(shard) => {
                        debug!(path = %path.display(), records = shard.len(), "loaded shard");
                        shard
                    }
                    Err(e) => {
                        warn!(
                            path = %path.display(),
                            error = %e,
                            "unreadable shard file, starting empty"
                        );
                        Shard::new()
                    }
                }
            } else {
                Shard::new()
            }
        })
    }

    /// Writes every buffered shard to its file path.
    ///
    /// Does not clear the buffer; clearing is the caller's responsibility
    /// once the write has been confirmed durable remotely.
    pub fn write_all(&self) -> Result<usize> {
        for (path, shard) in &self.shards {
            shard.write_to(path)?;
        }
        Ok(self.shards.len())
    }

    /// Drops all buffered shards.
    pub fn clear(&mut self) {
        self.shards.clear();
    }

    /// Merges a parsed diff for one repository-relative path into the
    /// buffer.
    ///
    /// Each added line is parsed as one record and appended to the shard —
    /// but only when that shard is already buffered; untouched shards are
    /// loaded from disk on demand when next written to, so their remote
    /// changes need no merging here. Unparsable lines are skipped with a
    /// warning.
    pub fn apply_changes(&mut self, rel_path: &Path, changes: &FileChanges) {
        let path = self.backup_dir.join(rel_path);
        let Some(shard) = self.shards.get_mut(&path) else {
            return;
        };

        for line in changes.added.values() {
            match serde_json::from_str::<Map<String, Value>>(line) {
                Ok(object) => shard.push(record::coerce(&object)),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping unparsable added line"
                    );
                }
            }
        }
    }

    /// Returns the buffered shards.
    pub fn shards(&self) -> &BTreeMap<PathBuf, Shard> {
        &self.shards
    }

    /// Returns the number of buffered shards.
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Returns the total number of buffered records across all shards.
    pub fn total_records(&self) -> usize {
        self.shards.values().map(Shard::len).sum()
    }
}
