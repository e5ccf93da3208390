//! Progress log entry format: `[<RFC 3339 timestamp>] <message>`.

use chrono::{DateTime, SecondsFormat, Utc};

/// Longest message kept in a single entry, in characters.
pub const MAX_MESSAGE_CHARS: usize = 500;

/// A parsed progress-log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Render one log line (with trailing newline) for `message` at `at`.
///
/// The message is flattened to a single line so that one entry is always one line.
pub fn format_entry(at: DateTime<Utc>, message: &str) -> String {
    format!(
        "[{}] {}\n",
        at.to_rfc3339_opts(SecondsFormat::Millis, true),
        flatten_message(message)
    )
}

/// Collapse whitespace runs (including newlines) and cap the length.
pub fn flatten_message(message: &str) -> String {
    let flat = message.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= MAX_MESSAGE_CHARS {
        return flat;
    }
    let mut cut: String = flat.chars().take(MAX_MESSAGE_CHARS - 3).collect();
    cut.push_str("...");
    cut
}

/// Parse a log line; `None` when it is not a well-formed entry.
pub fn parse_entry(line: &str) -> Option<ProgressEntry> {
    let rest = line.strip_prefix('[')?;
    let (stamp, message) = rest.split_once("] ")?;
    let timestamp = DateTime::parse_from_rfc3339(stamp).ok()?.with_timezone(&Utc);
    if message.trim().is_empty() {
        return None;
    }
    Some(ProgressEntry {
        timestamp,
        message: message.to_string(),
    })
}

/// Last `n` non-empty lines of the log, oldest first.
pub fn tail_lines(contents: &str, n: usize) -> Vec<String> {
    let lines: Vec<&str> = contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].iter().map(|line| line.to_string()).collect()
}
