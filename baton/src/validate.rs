//! Read-only consistency check of the durable artifacts.

use std::collections::HashSet;

use anyhow::{Context, Result};

use crate::core::ledger::count_passing;
use crate::io::config::load_config;
use crate::io::ledger::{LedgerLoad, load_ledger};
use crate::io::paths::ProjectPaths;
use crate::io::progress_log::read_progress_entries;
use crate::io::store::StateStore;

/// What `baton validate` found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateReport {
    pub ledger_present: bool,
    pub features: usize,
    pub passing: usize,
    pub progress_entries: usize,
    pub problems: Vec<String>,
}

impl ValidateReport {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} features, {} passing, {} progress entries",
            self.features, self.passing, self.progress_entries
        )
    }
}

/// Check config, ledger schema and identity uniqueness, and progress-log format.
///
/// Violations are collected into the report; only I/O failures are errors.
pub fn validate_project(store: &dyn StateStore, paths: &ProjectPaths) -> Result<ValidateReport> {
    let mut problems = Vec::new();

    if let Err(err) = load_config(&paths.config_path) {
        problems.push(format!("{err:#}"));
    }

    let ledger = load_ledger(store, &paths.ledger_rel).context("load ledger")?;
    let ledger_present = !matches!(ledger, LedgerLoad::Missing);
    if let LedgerLoad::Malformed { error, .. } = &ledger {
        problems.push(format!("{}: {error}", paths.ledger_rel.display()));
    }
    let records = ledger.records();
    let mut seen = HashSet::new();
    for record in records {
        if !seen.insert(record.key()) {
            problems.push(format!(
                "{}: duplicate feature '{}/{}'",
                paths.ledger_rel.display(),
                record.category,
                record.description
            ));
        }
    }

    let entries = read_progress_entries(store, &paths.progress_rel).context("read progress log")?;
    let mut progress_entries = 0usize;
    let mut last_timestamp = None;
    for entry in entries {
        match entry {
            Ok(entry) => {
                progress_entries += 1;
                if last_timestamp.is_some_and(|last| entry.timestamp < last) {
                    problems.push(format!(
                        "{}: entry at {} is older than the one before it",
                        paths.progress_rel.display(),
                        entry.timestamp.to_rfc3339()
                    ));
                }
                last_timestamp = Some(entry.timestamp);
            }
            Err(line) => problems.push(format!(
                "{}:{line}: not a `[timestamp] message` entry",
                paths.progress_rel.display()
            )),
        }
    }

    Ok(ValidateReport {
        ledger_present,
        features: records.len(),
        passing: count_passing(records),
        progress_entries,
        problems,
    })
}
