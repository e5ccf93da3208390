//! Bearings assembly: a fresh, read-only snapshot of the project at session start.

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::types::{Bearings, LedgerStatus};
use crate::io::config::BatonConfig;
use crate::io::git::VersionControl;
use crate::io::ledger::{LedgerLoad, load_ledger};
use crate::io::paths::ProjectPaths;
use crate::io::progress_log::read_progress_tail;
use crate::io::store::StateStore;

/// Bearings together with the ledger load it was built from.
///
/// The session needs the raw load (to merge and to preserve malformed bytes);
/// the snapshot alone is what callers print or render.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub bearings: Bearings,
    pub ledger: LedgerLoad,
}

/// Assemble bearings. Missing artifacts yield empty fields; nothing is written.
#[instrument(skip_all)]
pub fn assemble_bearings(
    store: &dyn StateStore,
    vcs: &dyn VersionControl,
    paths: &ProjectPaths,
    config: &BatonConfig,
) -> Result<Snapshot> {
    let files = store
        .list_files(&paths.workspace_rel)
        .context("list workspace files")?;
    let git_log = vcs
        .recent_commits(config.git_log_limit)
        .context("read recent commits")?;
    let progress_history = read_progress_tail(store, &paths.progress_rel, config.progress_tail)
        .context("read progress log")?;
    let ledger = load_ledger(store, &paths.ledger_rel)?;

    let ledger_status = match &ledger {
        LedgerLoad::Missing => LedgerStatus::Missing,
        LedgerLoad::Loaded(_) => LedgerStatus::Ok,
        LedgerLoad::Malformed { .. } => LedgerStatus::Malformed,
    };
    let (features_completed, features_pending) = ledger
        .records()
        .iter()
        .cloned()
        .partition(|record| record.passes);

    let bearings = Bearings {
        files,
        git_log,
        progress_history,
        features_completed,
        features_pending,
        ledger_status,
    };
    debug!(
        files = bearings.files.len(),
        commits = bearings.git_log.len(),
        completed = bearings.features_completed.len(),
        pending = bearings.features_pending.len(),
        "bearings gathered"
    );
    Ok(Snapshot { bearings, ledger })
}
