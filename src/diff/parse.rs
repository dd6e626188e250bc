//! The line-by-line diff walk.
//!
//! Line numbers are tracked with two cursors, one per side of the diff. A
//! hunk header resets both cursors to its declared start lines; a removed
//! line is recorded at the old cursor, an added line at the new cursor,
//! and a context line advances both without being recorded.

use std::collections::BTreeMap;
use std::iter::Peekable;
use std::str::Lines;

use super::{ChangeKind, DiffError, DiffResult, FileChanges};

/// Parses a whole-repository unified diff into per-file changes.
///
/// Renamed files carry only their [`ChangeKind::RenamedTo`] marker; the
/// rest of their section is skipped. Entries are keyed by the file's old
/// path (equal to the new path except for renames).
pub fn parse_repo_diff(text: &str) -> DiffResult<BTreeMap<String, FileChanges>> {
    let mut files = BTreeMap::new();
    let mut lines = text.lines().peekable();

    while let Some(line) = lines.next() {
        if !line.starts_with("diff ") {
            continue;
        }
        let (old_name, new_name) = parse_file_header(line)?;
        if old_name != new_name {
            files.insert(
                old_name,
                FileChanges::with_kind(ChangeKind::RenamedTo(new_name)),
            );
            skip_section(&mut lines);
            continue;
        }
        files.insert(old_name, parse_section(&mut lines)?);
    }

    Ok(files)
}

/// Parses a diff restricted to a single path into one change set.
///
/// Returns an empty change set when the text contains no file section
/// (the two revisions agree on the path).
pub fn parse_file_diff(text: &str) -> DiffResult<FileChanges> {
    let mut lines = text.lines().peekable();

    while let Some(line) = lines.next() {
        if !line.starts_with("diff ") {
            continue;
        }
        let (old_name, new_name) = parse_file_header(line)?;
        if old_name != new_name {
            return Ok(FileChanges::with_kind(ChangeKind::RenamedTo(new_name)));
        }
        return parse_section(&mut lines);
    }

    Ok(FileChanges::new())
}

/// Extracts the old and new path from a `diff --git a/X b/Y` line.
fn parse_file_header(line: &str) -> DiffResult<(String, String)> {
    let malformed = || DiffError::MalformedFileHeader {
        line: line.to_string(),
    };

    let rest = line.strip_prefix("diff --git a/").ok_or_else(malformed)?;
    let split = rest.find(" b/").ok_or_else(malformed)?;
    let old = rest[..split].trim_matches('"').to_string();
    let new = rest[split + 3..].trim_matches('"').to_string();
    if old.is_empty() || new.is_empty() {
        return Err(malformed());
    }
    Ok((old, new))
}

/// Walks one file section up to the next `diff` line.
fn parse_section(lines: &mut Peekable<Lines<'_>>) -> DiffResult<FileChanges> {
    let mut changes = FileChanges::new();
    let mut old_cursor: u64 = 1;
    let mut new_cursor: u64 = 1;
    let mut in_hunk = false;

    while let Some(&line) = lines.peek() {
        if line.starts_with("diff ") {
            break;
        }
        lines.next();

        // The `---`/`+++` side markers must be checked before the generic
        // removed/added prefixes.
        if let Some(rest) = line.strip_prefix("--- ") {
            if rest.trim() == "/dev/null" {
                skip_section(lines);
                return Ok(FileChanges::with_kind(ChangeKind::NewFile));
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("+++ ") {
            if rest.trim() == "/dev/null" {
                skip_section(lines);
                return Ok(FileChanges::with_kind(ChangeKind::DeletedFile));
            }
            continue;
        }
        if line.starts_with("@@") {
            let hunk = HunkHeader::parse(line)?;
            old_cursor = hunk.old_start;
            new_cursor = hunk.new_start;
            in_hunk = true;
            continue;
        }
        if !in_hunk {
            // Metadata between the file header and the first hunk
            // (index lines, mode changes).
            continue;
        }

        if let Some(rest) = line.strip_prefix('-') {
            changes.removed.insert(old_cursor, rest.to_string());
            old_cursor += 1;
        } else if let Some(rest) = line.strip_prefix('+') {
            changes.added.insert(new_cursor, rest.to_string());
            new_cursor += 1;
        } else {
            old_cursor += 1;
            new_cursor += 1;
        }
    }

    Ok(changes)
}

/// Consumes lines up to (not including) the next `diff` line.
fn skip_section(lines: &mut Peekable<Lines<'_>>) {
    while lines.peek().is_some_and(|line| !line.starts_with("diff ")) {
        lines.next();
    }
}

/// A parsed `@@ -oldStart,oldLen +newStart,newLen @@` header.
///
/// Only the start lines feed the cursors; the lengths are validated and
/// discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HunkHeader {
    old_start: u64,
    new_start: u64,
}

impl HunkHeader {
    fn parse(line: &str) -> DiffResult<Self> {
        let malformed = || DiffError::MalformedHunkHeader {
            line: line.to_string(),
        };

        let mut tokens = line.split_whitespace();
        if tokens.next() != Some("@@") {
            return Err(malformed());
        }
        let old = tokens
            .next()
            .and_then(|t| t.strip_prefix('-'))
            .ok_or_else(malformed)?;
        let new = tokens
            .next()
            .and_then(|t| t.strip_prefix('+'))
            .ok_or_else(malformed)?;
        if tokens.next() != Some("@@") {
            return Err(malformed());
        }

        let (old_start, _) = parse_range(old).ok_or_else(malformed)?;
        let (new_start, _) = parse_range(new).ok_or_else(malformed)?;
        Ok(HunkHeader {
            old_start,
            new_start,
        })
    }
}

/// Parses `start,len` with the unified-diff convention that an absent
/// length defaults to 1.
fn parse_range(text: &str) -> Option<(u64, u64)> {
    match text.split_once(',') {
        Some((start, len)) => Some((start.parse().ok()?, len.parse().ok()?)),
        None => Some((text.parse().ok()?, 1)),
    }
}
