//! Shared deterministic types for the session core.
//!
//! These types define stable contracts between the bearings assembler, the
//! ledger merge and the session protocol. They carry no I/O handles.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One unit of required functionality in `feature_list.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub category: String,
    pub description: String,
    pub steps: Vec<String>,
    pub passes: bool,
}

impl FeatureRecord {
    /// Identity used when matching records across ledger rewrites.
    pub fn key(&self) -> (&str, &str) {
        (self.category.as_str(), self.description.as_str())
    }
}

/// How the ledger looked when bearings were assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    Missing,
    Ok,
    Malformed,
}

/// Read-only snapshot of the project, rebuilt at the start of every session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bearings {
    /// Non-hidden file names in the workspace, sorted.
    pub files: Vec<String>,
    /// Recent commit summaries, newest first.
    pub git_log: Vec<String>,
    /// Trailing progress-log lines, oldest first.
    pub progress_history: Vec<String>,
    pub features_completed: Vec<FeatureRecord>,
    /// Records still open, in ledger order.
    pub features_pending: Vec<FeatureRecord>,
    pub ledger_status: LedgerStatus,
}

impl Bearings {
    pub fn empty() -> Self {
        Self {
            files: Vec::new(),
            git_log: Vec::new(),
            progress_history: Vec::new(),
            features_completed: Vec::new(),
            features_pending: Vec::new(),
            ledger_status: LedgerStatus::Missing,
        }
    }

    pub fn total_features(&self) -> usize {
        self.features_completed.len() + self.features_pending.len()
    }
}

/// Which framing the session runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionKind {
    /// Decompose a task into a ledger, a startup script and a first progress note.
    Initialize { task: String },
    /// Implement one feature, or follow an explicit instruction.
    Coding { instruction: Option<String> },
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Initialize { .. } => "initialize",
            SessionKind::Coding { .. } => "coding",
        }
    }

    pub fn is_initialize(&self) -> bool {
        matches!(self, SessionKind::Initialize { .. })
    }
}

/// Session protocol states, in the only order they may be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    NotStarted,
    BearingsGathered,
    AgentInvoked,
    OutputApplied,
    Committed,
    Logged,
}

impl SessionState {
    /// The state that follows `self`, or `None` for the terminal state.
    pub fn next(self) -> Option<SessionState> {
        match self {
            SessionState::NotStarted => Some(SessionState::BearingsGathered),
            SessionState::BearingsGathered => Some(SessionState::AgentInvoked),
            SessionState::AgentInvoked => Some(SessionState::OutputApplied),
            SessionState::OutputApplied => Some(SessionState::Committed),
            SessionState::Committed => Some(SessionState::Logged),
            SessionState::Logged => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::NotStarted => "NOT_STARTED",
            SessionState::BearingsGathered => "BEARINGS_GATHERED",
            SessionState::AgentInvoked => "AGENT_INVOKED",
            SessionState::OutputApplied => "OUTPUT_APPLIED",
            SessionState::Committed => "COMMITTED",
            SessionState::Logged => "LOGGED",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the post-session commit attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommitOutcome {
    Committed,
    /// The attempt failed; tolerated, kept for the transcript.
    Failed { reason: String },
}

/// Result of running the optional verification command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verification {
    /// No command configured, or nothing was claimed complete.
    Skipped,
    Passed,
    Failed,
}
