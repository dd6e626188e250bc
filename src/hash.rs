//! Canonical content hashing for shard naming.
//!
//! Shard files are named by a prefix of a content hash over the record, so
//! the same logical record must always hash the same way regardless of the
//! key order it arrived with. Objects are therefore serialized with their
//! keys sorted at every nesting depth before hashing.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::record::LogRecord;

/// Number of leading hex characters of the content hash used as the shard
/// file name.
pub const PREFIX_LEN: usize = 2;

/// Serializes a JSON value to its canonical text form.
///
/// Identical to compact `serde_json` output except that object keys are
/// emitted in sorted order at every depth, so two values that differ only
/// in key order produce identical text.
pub fn canonical_text(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            // Serializing a bare string cannot fail.
            out.push_str(&serde_json::to_string(s).unwrap_or_default());
        }
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (idx, key) in keys.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
    }
}

/// Returns the SHA-256 hex digest of a value's canonical text.
pub fn content_hash(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_text(value).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Returns the shard-name prefix (first [`PREFIX_LEN`] hex characters of
/// the content hash) for a coerced record.
pub fn record_prefix(record: &LogRecord) -> String {
    let fields = record
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    let mut hash = content_hash(&Value::Object(fields));
    hash.truncate(PREFIX_LEN);
    hash
}
