//! Session protocol: one lock, one bearings snapshot, one model call, one set of
//! writes, one commit, one progress entry.
//!
//! States advance strictly `NOT_STARTED → BEARINGS_GATHERED → AGENT_INVOKED →
//! OUTPUT_APPLIED → COMMITTED → LOGGED`. A failure stops the machine where it
//! is; nothing already written is rolled back. Everything that can reject the
//! agent's output (extraction, ledger parsing, the merge rules) runs before the
//! first write.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::bearings::{Snapshot, assemble_bearings};
use crate::core::extract::{AgentOutput, ExtractError, LEDGER_FILE, parse_agent_output};
use crate::core::ledger::{LedgerMerge, MergeError, count_passing, merge_ledger};
use crate::core::types::{CommitOutcome, SessionKind, SessionState, Verification};
use crate::io::config::{BatonConfig, write_config};
use crate::io::git::VersionControl;
use crate::io::ledger::{LedgerLoad, parse_ledger, write_ledger};
use crate::io::lock::{LockMode, SessionLock};
use crate::io::paths::ProjectPaths;
use crate::io::progress_log::append_progress;
use crate::io::prompt::PromptBuilder;
use crate::io::provider::{CompletionRequest, ModelProvider};
use crate::io::store::StateStore;
use crate::io::transcript::{
    SessionMeta, TranscriptPaths, session_id, write_exchange, write_meta, write_verify_log,
};
use crate::io::verify::{Verifier, VerifyReport, verify_if_claimed};

const INITIAL_COMMIT_MESSAGE: &str = "Initial commit: project setup";
const CODING_COMMIT_MESSAGE: &str = "Update: progress from coding session";

/// Failures that end a session with a distinct exit code.
///
/// Carried inside `anyhow::Error`; recover with `downcast_ref`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("another session is active (lock held at {})", .path.display())]
    Locked { path: PathBuf },

    #[error("model call failed: {reason}")]
    ModelCall { reason: String },

    #[error("agent output has no `{file}` artifact")]
    MissingArtifact { file: &'static str },

    #[error("proposed ledger rejected: {reason}")]
    InvalidLedger { reason: String },

    #[error(
        "proposed ledger rejected: {count} features marked complete in one session \
         (at most one allowed): {}",
        .descriptions.join(", ")
    )]
    TooManyCompletions {
        count: usize,
        descriptions: Vec<String>,
    },

    #[error("agent output names an unsafe path: {path}")]
    UnsafePath { path: String },

    #[error("agent output could not be applied: {0}")]
    InvalidOutput(#[source] ExtractError),
}

impl From<ExtractError> for SessionError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::UnsafePath { path } => SessionError::UnsafePath { path },
            other => SessionError::InvalidOutput(other),
        }
    }
}

impl From<MergeError> for SessionError {
    fn from(err: MergeError) -> Self {
        match err {
            MergeError::TooManyCompletions {
                count,
                descriptions,
            } => SessionError::TooManyCompletions {
                count,
                descriptions,
            },
            other @ MergeError::DuplicateRecord { .. } => SessionError::InvalidLedger {
                reason: other.to_string(),
            },
        }
    }
}

/// Summary of a session that reached `LOGGED`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub session_id: String,
    pub kind: &'static str,
    pub state: SessionState,
    pub files_written: Vec<String>,
    pub startup_script_written: bool,
    /// Feature marked complete this session (after verification).
    pub completed_feature: Option<String>,
    pub verification: Verification,
    /// Records and passing count of the rewritten ledger; `None` when untouched.
    pub ledger: Option<(usize, usize)>,
    pub restored_records: usize,
    pub commit: CommitOutcome,
    pub pushed: Option<bool>,
    pub progress_entry: String,
}

/// Everything derived from the response before any write happens.
#[derive(Debug)]
struct OutputPlan {
    output: AgentOutput,
    merge: Option<LedgerMerge>,
}

/// Drives sessions against injected collaborators.
pub struct Coordinator<S, V, M, R> {
    store: S,
    vcs: V,
    model: M,
    verifier: R,
    paths: ProjectPaths,
    config: BatonConfig,
    lock_mode: LockMode,
}

impl<S, V, M, R> Coordinator<S, V, M, R>
where
    S: StateStore,
    V: VersionControl,
    M: ModelProvider,
    R: Verifier,
{
    pub fn new(
        store: S,
        vcs: V,
        model: M,
        verifier: R,
        paths: ProjectPaths,
        config: BatonConfig,
    ) -> Self {
        Self {
            store,
            vcs,
            model,
            verifier,
            paths,
            config,
            lock_mode: LockMode::default(),
        }
    }

    pub fn with_lock_mode(mut self, lock_mode: LockMode) -> Self {
        self.lock_mode = lock_mode;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn vcs(&self) -> &V {
        &self.vcs
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Run one session of `kind` to completion.
    #[instrument(skip_all, fields(kind = kind.as_str()))]
    pub fn run(&self, kind: &SessionKind) -> Result<SessionOutcome> {
        let started_at = Utc::now();
        let start = Instant::now();
        let _lock = SessionLock::acquire(&self.paths.lock_path, self.lock_mode)?;
        let mut state = SessionState::NotStarted;

        let snapshot = assemble_bearings(&self.store, &self.vcs, &self.paths, &self.config)?;
        advance(&mut state, SessionState::BearingsGathered);

        let directive =
            PromptBuilder::new(self.config.prompt_budget_bytes).build(kind, &snapshot.bearings)?;
        let request = CompletionRequest {
            system: directive.system.clone(),
            user: directive.user.clone(),
            max_tokens: self.config.model.max_tokens,
            temperature: self.config.model.temperature,
        };
        let response = self
            .model
            .complete(&request)
            .map_err(|err| SessionError::ModelCall {
                reason: format!("{err:#}"),
            })?;
        advance(&mut state, SessionState::AgentInvoked);

        let id = session_id(started_at);
        let transcript = TranscriptPaths::new(&self.paths.sessions_dir, &id);
        if let Err(err) = write_exchange(&transcript, &directive.to_markdown(), &response) {
            warn!(err = %format!("{err:#}"), "failed to write session transcript");
        }

        let mut meta = SessionMeta {
            session_id: id.clone(),
            kind: kind.as_str().to_string(),
            model: self.config.model.name.clone(),
            state,
            started_at: started_at.to_rfc3339(),
            ended_at: None,
            duration_ms: None,
            files_written: 0,
            completed_feature: None,
            verification: Verification::Skipped,
            commit: None,
            pushed: None,
            error: None,
        };

        let result =
            self.apply_commit_log(kind, &snapshot, &response, &transcript, &mut meta, &mut state);

        meta.state = state;
        meta.ended_at = Some(Utc::now().to_rfc3339());
        meta.duration_ms = Some(start.elapsed().as_millis() as u64);
        if let Err(err) = &result {
            meta.error = Some(format!("{err:#}"));
        }
        if let Err(err) = write_meta(&transcript, &meta) {
            warn!(err = %format!("{err:#}"), "failed to write session meta");
        }

        result.map(|mut outcome| {
            outcome.session_id = id;
            outcome
        })
    }

    fn apply_commit_log(
        &self,
        kind: &SessionKind,
        snapshot: &Snapshot,
        response: &str,
        transcript: &TranscriptPaths,
        meta: &mut SessionMeta,
        state: &mut SessionState,
    ) -> Result<SessionOutcome> {
        let OutputPlan { output, mut merge } =
            plan_output(kind, &snapshot.ledger, response, &self.config)?;
        if output.is_empty() {
            warn!("agent output contained no file artifacts");
        }

        if let Err(err) = self.vcs.ensure_repo() {
            warn!(err = %format!("{err:#}"), "could not prepare workspace repository");
        }

        let mut files_written = Vec::with_capacity(output.workspace_files.len());
        for artifact in &output.workspace_files {
            self.store
                .replace(&self.paths.workspace_file_rel(&artifact.path), &artifact.contents)?;
            files_written.push(artifact.path.clone());
        }
        meta.files_written = files_written.len();

        let startup_script_written = match &output.startup_script {
            Some(script) => {
                self.store.replace(&self.paths.startup_script_rel, script)?;
                self.store.set_executable(&self.paths.startup_script_rel)?;
                true
            }
            None => {
                if kind.is_initialize() {
                    warn!("initialization output has no startup script");
                }
                false
            }
        };

        if kind.is_initialize() && !self.paths.config_path.exists() {
            if let Err(err) = write_config(&self.paths.config_path, &self.config) {
                warn!(err = %format!("{err:#}"), "could not record session configuration");
            }
        }

        let mut verification = Verification::Skipped;
        if let Some(merge) = merge.as_mut() {
            verification = self.verify_completion(merge, transcript);
            if let LedgerLoad::Malformed { raw, .. } = &snapshot.ledger {
                self.store.replace(&self.paths.malformed_ledger_rel, raw)?;
                warn!(
                    path = %self.paths.malformed_ledger_rel.display(),
                    "preserved malformed ledger before rewrite"
                );
            }
            write_ledger(&self.store, &self.paths.ledger_rel, &merge.records)?;
        }
        let completed_feature = merge
            .as_ref()
            .and_then(LedgerMerge::completed_record)
            .map(|record| record.description.clone());
        meta.verification = verification;
        meta.completed_feature = completed_feature.clone();
        advance(state, SessionState::OutputApplied);
        meta.state = *state;

        let message = commit_message(kind, completed_feature.as_deref());
        let commit = match self.vcs.commit_all(&message) {
            Ok(outcome) => outcome,
            Err(err) => CommitOutcome::Failed {
                reason: format!("{err:#}"),
            },
        };
        if let CommitOutcome::Failed { reason } = &commit {
            warn!(reason = %reason, "commit failed, continuing");
        }
        let pushed = self.push_if_enabled(&commit);
        meta.commit = Some(commit.clone());
        meta.pushed = pushed;
        advance(state, SessionState::Committed);

        let entry = progress_message(
            kind,
            completed_feature.as_deref(),
            merge.as_ref(),
            verification,
            output.progress_note.as_deref(),
        );
        let progress_entry =
            append_progress(&self.store, &self.paths.progress_rel, Utc::now(), &entry)?;
        advance(state, SessionState::Logged);

        Ok(SessionOutcome {
            session_id: String::new(),
            kind: kind.as_str(),
            state: *state,
            files_written,
            startup_script_written,
            completed_feature,
            verification,
            ledger: merge
                .as_ref()
                .map(|merge| (merge.records.len(), count_passing(&merge.records))),
            restored_records: merge.as_ref().map_or(0, |merge| merge.restored),
            commit,
            pushed,
            progress_entry: progress_entry.trim_end().to_string(),
        })
    }

    /// Run the verifier for a claimed completion and revert the claim on failure.
    fn verify_completion(
        &self,
        merge: &mut LedgerMerge,
        transcript: &TranscriptPaths,
    ) -> Verification {
        let report = match verify_if_claimed(
            merge.completed.is_some(),
            &self.verifier,
            &self.paths.workspace_dir,
        ) {
            Ok(report) => report,
            Err(err) => VerifyReport {
                verification: Verification::Failed,
                log: format!("verifier error: {err:#}"),
            },
        };
        if !report.log.is_empty() {
            if let Err(err) = write_verify_log(transcript, &report.log) {
                warn!(err = %format!("{err:#}"), "failed to write verify log");
            }
        }
        if report.verification == Verification::Failed {
            if let Some(record) = merge.revert_completion() {
                warn!(feature = %record.description, "verification failed, completion reverted");
            }
        }
        report.verification
    }

    fn push_if_enabled(&self, commit: &CommitOutcome) -> Option<bool> {
        let push = &self.config.push;
        if !push.enabled || *commit != CommitOutcome::Committed {
            return None;
        }
        match self.vcs.push(&push.remote, &push.branch) {
            Ok(()) => Some(true),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "push failed, continuing");
                Some(false)
            }
        }
    }
}

fn advance(state: &mut SessionState, to: SessionState) {
    debug_assert_eq!(state.next(), Some(to), "session states must advance in order");
    debug!(from = %state, to = %to, "session state");
    *state = to;
}

/// Extract artifacts and merge the proposed ledger without touching anything.
fn plan_output(
    kind: &SessionKind,
    prev: &LedgerLoad,
    response: &str,
    config: &BatonConfig,
) -> Result<OutputPlan, SessionError> {
    let output = parse_agent_output(response, config.extract_limits())?;

    let merge = match output.ledger.as_deref() {
        Some(raw) => {
            let proposed = parse_ledger(raw).map_err(|err| SessionError::InvalidLedger {
                reason: format!("{err:#}"),
            })?;
            if proposed.is_empty() {
                return Err(SessionError::InvalidLedger {
                    reason: "proposed ledger has no features".to_string(),
                });
            }
            let merge = merge_ledger(prev.records(), &proposed)?;
            debug!(
                records = merge.records.len(),
                appended = merge.appended,
                "proposed ledger merged"
            );
            if merge.restored > 0 {
                warn!(restored = merge.restored, "proposal dropped existing features, restored");
            }
            if merge.reset_on_append > 0 {
                warn!(reset = merge.reset_on_append, "new features cannot start complete, reset");
            }
            if !merge.regressed.is_empty() {
                info!(regressed = merge.regressed.len(), "features marked not passing");
            }
            Some(merge)
        }
        None if kind.is_initialize() => {
            return Err(SessionError::MissingArtifact { file: LEDGER_FILE });
        }
        None => None,
    };

    Ok(OutputPlan { output, merge })
}

fn commit_message(kind: &SessionKind, completed: Option<&str>) -> String {
    match (kind, completed) {
        (SessionKind::Initialize { .. }, _) => INITIAL_COMMIT_MESSAGE.to_string(),
        (SessionKind::Coding { .. }, Some(feature)) => format!("Complete feature: {feature}"),
        (SessionKind::Coding { .. }, None) => CODING_COMMIT_MESSAGE.to_string(),
    }
}

fn progress_message(
    kind: &SessionKind,
    completed: Option<&str>,
    merge: Option<&LedgerMerge>,
    verification: Verification,
    note: Option<&str>,
) -> String {
    let mut message = format!("{} session complete", kind.as_str());
    if let (SessionKind::Initialize { .. }, Some(merge)) = (kind, merge) {
        message.push_str(&format!("; {} features planned", merge.records.len()));
    }
    if let Some(feature) = completed {
        message.push_str(&format!("; completed '{feature}'"));
    }
    if verification == Verification::Failed {
        message.push_str("; verification failed, completion not recorded");
    }
    if let Some(note) = note.map(str::trim).filter(|note| !note.is_empty()) {
        message.push_str(": ");
        message.push_str(note);
    }
    message
}
