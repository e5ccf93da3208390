//! Per-session transcripts under `.baton/sessions/<session-id>/`.
//!
//! Transcripts are diagnostics only. Recovery never reads them back; a session
//! gets one only once the model has answered.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::types::{CommitOutcome, SessionState, Verification};

/// Sortable id derived from the session start time.
pub fn session_id(started_at: DateTime<Utc>) -> String {
    started_at.format("%Y%m%dT%H%M%S%.3fZ").to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionMeta {
    pub session_id: String,
    pub kind: String,
    pub model: String,
    /// Last state the protocol reached.
    pub state: SessionState,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub duration_ms: Option<u64>,
    pub files_written: usize,
    pub completed_feature: Option<String>,
    pub verification: Verification,
    pub commit: Option<CommitOutcome>,
    pub pushed: Option<bool>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TranscriptPaths {
    pub dir: PathBuf,
    pub prompt_path: PathBuf,
    pub response_path: PathBuf,
    pub meta_path: PathBuf,
    pub verify_log_path: PathBuf,
}

impl TranscriptPaths {
    pub fn new(sessions_dir: &Path, session_id: &str) -> Self {
        let dir = sessions_dir.join(session_id);
        Self {
            prompt_path: dir.join("prompt.md"),
            response_path: dir.join("response.md"),
            meta_path: dir.join("meta.json"),
            verify_log_path: dir.join("verify.log"),
            dir,
        }
    }
}

/// Record the exchange with the model.
pub fn write_exchange(paths: &TranscriptPaths, prompt: &str, response: &str) -> Result<()> {
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create session dir {}", paths.dir.display()))?;
    write_text(&paths.prompt_path, prompt)?;
    write_text(&paths.response_path, response)
}

pub fn write_verify_log(paths: &TranscriptPaths, log: &str) -> Result<()> {
    write_text(&paths.verify_log_path, log)
}

/// Write (or overwrite) `meta.json`.
pub fn write_meta(paths: &TranscriptPaths, meta: &SessionMeta) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(meta).context("serialize session meta")?;
    buf.push('\n');
    write_text(&paths.meta_path, &buf)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn session_ids_sort_by_start_time() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let id = session_id(t0);
        assert_eq!(id, "20260304T050607.000Z");
        assert!(session_id(t0 + chrono::Duration::milliseconds(5)) > id);
    }

    #[test]
    fn writes_exchange_and_meta() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = TranscriptPaths::new(&temp.path().join(".baton/sessions"), "s1");

        write_exchange(&paths, "prompt", "response").expect("exchange");
        let meta = SessionMeta {
            session_id: "s1".to_string(),
            kind: "coding".to_string(),
            model: "m".to_string(),
            state: SessionState::Logged,
            started_at: "2026-01-01T00:00:00Z".to_string(),
            ended_at: None,
            duration_ms: None,
            files_written: 2,
            completed_feature: Some("add item".to_string()),
            verification: Verification::Skipped,
            commit: Some(CommitOutcome::Committed),
            pushed: None,
            error: None,
        };
        write_meta(&paths, &meta).expect("meta");

        assert_eq!(fs::read_to_string(&paths.response_path).expect("read"), "response");
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.meta_path).expect("read"))
                .expect("json");
        assert_eq!(value["state"], "LOGGED");
        assert_eq!(value["commit"]["outcome"], "committed");
        assert_eq!(value["verification"], "skipped");
    }
}
