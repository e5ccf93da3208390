//! Append-only access to `claude-progress.txt`.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::core::progress::{ProgressEntry, format_entry, parse_entry, tail_lines};
use crate::io::store::StateStore;

/// Append one entry. The log is created on first write and never rewritten.
pub fn append_progress(
    store: &dyn StateStore,
    rel: &Path,
    at: DateTime<Utc>,
    message: &str,
) -> Result<String> {
    let line = format_entry(at, message);
    store
        .append(rel, &line)
        .with_context(|| format!("append progress entry to {}", rel.display()))?;
    debug!(path = %rel.display(), "progress entry appended");
    Ok(line)
}

/// Last `n` lines of the log; a missing log is empty.
pub fn read_progress_tail(store: &dyn StateStore, rel: &Path, n: usize) -> Result<Vec<String>> {
    let contents = store.read(rel)?.unwrap_or_default();
    Ok(tail_lines(&contents, n))
}

/// Parsed log lines, in order. Malformed lines are returned as `Err(line_number)`.
pub fn read_progress_entries(
    store: &dyn StateStore,
    rel: &Path,
) -> Result<Vec<std::result::Result<ProgressEntry, usize>>> {
    let contents = store.read(rel)?.unwrap_or_default();
    Ok(contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| parse_entry(line).ok_or(idx + 1))
        .collect())
}
