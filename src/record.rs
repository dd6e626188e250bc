//! Log records and shard path derivation.
//!
//! A record arrives as an arbitrary JSON object and is coerced to a flat
//! string-to-string mapping before storage. The shard it lands in is a
//! deterministic function of the record: its date (from the `timestamp`
//! field, or the current reference time) and a two-hex-character prefix of
//! its content hash.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, FixedOffset};
use serde_json::{Map, Value};

use crate::clock;
use crate::hash;

/// A stored log record: field name to string value, ordered by field name.
pub type LogRecord = BTreeMap<String, String>;

/// The field consulted for the record's date.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Coerces an incoming JSON object to a [`LogRecord`].
///
/// Strings are kept as-is; other scalars use their JSON text. Nested
/// objects and arrays are flattened to canonical JSON text (keys sorted at
/// every depth), so the coerced value never depends on the key order the
/// caller happened to use.
pub fn coerce(object: &Map<String, Value>) -> LogRecord {
    object
        .iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Object(_) | Value::Array(_) => hash::canonical_text(value),
                other => other.to_string(),
            };
            (key.clone(), text)
        })
        .collect()
}

/// Returns the date a record shards under.
///
/// Uses the record's `timestamp` field when present and parsable; falls
/// back to the current time in the reference zone otherwise.
pub fn record_date(record: &LogRecord) -> DateTime<FixedOffset> {
    record
        .get(TIMESTAMP_FIELD)
        .and_then(|value| clock::parse_timestamp(value))
        .unwrap_or_else(clock::reference_now)
}

/// Returns the shard file path for a record:
/// `<backup_dir>/<year>/<month>/<day>/<hash-prefix>.json`.
pub fn shard_path(backup_dir: &Path, record: &LogRecord) -> PathBuf {
    let date = record_date(record);
    backup_dir
        .join(date.year().to_string())
        .join(date.month().to_string())
        .join(date.day().to_string())
        .join(format!("{}.json", hash::record_prefix(record)))
}
