//! Merge rules for rewriting the feature ledger from an agent proposal.
//!
//! The previous ledger is authoritative for record identity and content; the
//! proposal may only flip `passes` on known records or append new ones.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::core::types::FeatureRecord;

/// Maximum number of `false -> true` transitions a single session may make.
pub const MAX_COMPLETIONS_PER_SESSION: usize = 1;

/// Outcome of merging a proposed ledger into the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerMerge {
    pub records: Vec<FeatureRecord>,
    /// Index of the record flipped to `passes=true` this session, if any.
    pub completed: Option<usize>,
    /// Indices flipped back to `passes=false`.
    pub regressed: Vec<usize>,
    /// Previous records the proposal dropped and the merge put back.
    pub restored: usize,
    /// New records appended from the proposal.
    pub appended: usize,
    /// Appended records that arrived with `passes=true` and were reset.
    pub reset_on_append: usize,
}

impl LedgerMerge {
    pub fn completed_record(&self) -> Option<&FeatureRecord> {
        self.completed.map(|idx| &self.records[idx])
    }

    /// Undo this session's completion flip (used when verification fails).
    pub fn revert_completion(&mut self) -> Option<&FeatureRecord> {
        let idx = self.completed.take()?;
        self.records[idx].passes = false;
        Some(&self.records[idx])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error(
        "{count} features marked complete in one session (at most one allowed): {}",
        .descriptions.join(", ")
    )]
    TooManyCompletions {
        count: usize,
        descriptions: Vec<String>,
    },
    #[error("proposed ledger repeats feature '{category}/{description}'")]
    DuplicateRecord {
        category: String,
        description: String,
    },
}

/// Merge `proposed` into `prev`.
///
/// - Previous records keep their position and `category`/`description`/`steps`.
/// - A previous record takes the proposed `passes` when the proposal names it.
/// - Previous records missing from the proposal are restored unchanged.
/// - Unknown proposed records are appended with `passes=false`.
/// - At most one record may move from `passes=false` to `passes=true`.
pub fn merge_ledger(
    prev: &[FeatureRecord],
    proposed: &[FeatureRecord],
) -> Result<LedgerMerge, MergeError> {
    let mut proposed_passes: HashMap<(&str, &str), bool> = HashMap::new();
    for record in proposed {
        if proposed_passes.insert(record.key(), record.passes).is_some() {
            return Err(MergeError::DuplicateRecord {
                category: record.category.clone(),
                description: record.description.clone(),
            });
        }
    }

    let mut records = Vec::with_capacity(prev.len().max(proposed.len()));
    let mut flipped = Vec::new();
    let mut regressed = Vec::new();
    let mut restored = 0usize;
    let mut known: HashSet<(&str, &str)> = HashSet::new();

    for (idx, old) in prev.iter().enumerate() {
        known.insert(old.key());
        let mut kept = old.clone();
        match proposed_passes.get(&old.key()) {
            Some(&passes) => {
                if !old.passes && passes {
                    flipped.push(idx);
                } else if old.passes && !passes {
                    regressed.push(idx);
                }
                kept.passes = passes;
            }
            None => restored += 1,
        }
        records.push(kept);
    }

    if flipped.len() > MAX_COMPLETIONS_PER_SESSION {
        return Err(MergeError::TooManyCompletions {
            count: flipped.len(),
            descriptions: flipped
                .iter()
                .map(|&idx| records[idx].description.clone())
                .collect(),
        });
    }

    let mut appended = 0usize;
    let mut reset_on_append = 0usize;
    for record in proposed {
        if known.contains(&record.key()) {
            continue;
        }
        let mut fresh = record.clone();
        if fresh.passes {
            fresh.passes = false;
            reset_on_append += 1;
        }
        records.push(fresh);
        appended += 1;
    }

    Ok(LedgerMerge {
        records,
        completed: flipped.first().copied(),
        regressed,
        restored,
        appended,
        reset_on_append,
    })
}

/// Count records with `passes=true`.
pub fn count_passing(records: &[FeatureRecord]) -> usize {
    records.iter().filter(|record| record.passes).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::feature;

    #[test]
    fn merge_accepts_single_completion_and_keeps_content() {
        let prev = vec![feature("functional", "add item", false)];
        let mut claimed = feature("functional", "add item", true);
        claimed.steps = vec!["rewritten step".to_string()];

        let merge = merge_ledger(&prev, &[claimed]).expect("merge");

        assert_eq!(merge.completed, Some(0));
        assert!(merge.records[0].passes);
        assert_eq!(merge.records[0].steps, prev[0].steps);
        assert_eq!(count_passing(&merge.records), 1);
    }

    #[test]
    fn merge_rejects_two_completions() {
        let prev = vec![feature("functional", "a", false), feature("functional", "b", false)];
        let proposed = vec![feature("functional", "a", true), feature("functional", "b", true)];

        let err = merge_ledger(&prev, &proposed).unwrap_err();
        assert!(matches!(err, MergeError::TooManyCompletions { count: 2, .. }));
        assert!(err.to_string().contains("a, b"));
    }

    #[test]
    fn merge_restores_dropped_records_in_place() {
        let prev = vec![
            feature("functional", "a", true),
            feature("functional", "b", false),
            feature("ui", "c", false),
        ];
        let proposed = vec![feature("ui", "c", false)];

        let merge = merge_ledger(&prev, &proposed).expect("merge");

        assert_eq!(merge.records, prev);
        assert_eq!(merge.restored, 2);
        assert_eq!(merge.completed, None);
    }

    #[test]
    fn merge_appends_new_records_as_open() {
        let prev = vec![feature("functional", "a", false)];
        let proposed = vec![feature("functional", "a", false), feature("functional", "new", true)];

        let merge = merge_ledger(&prev, &proposed).expect("merge");

        assert_eq!(merge.records.len(), 2);
        assert_eq!(merge.records[1].description, "new");
        assert!(!merge.records[1].passes);
        assert_eq!(merge.appended, 1);
        assert_eq!(merge.reset_on_append, 1);
        assert_eq!(merge.completed, None);
    }

    #[test]
    fn merge_into_empty_ledger_opens_every_record() {
        let proposed = vec![feature("functional", "a", true), feature("functional", "b", true)];

        let merge = merge_ledger(&[], &proposed).expect("merge");

        assert_eq!(count_passing(&merge.records), 0);
        assert_eq!(merge.appended, 2);
    }

    #[test]
    fn merge_reports_regressions() {
        let prev = vec![feature("functional", "a", true)];
        let merge = merge_ledger(&prev, &[feature("functional", "a", false)]).expect("merge");
        assert_eq!(merge.regressed, vec![0]);
        assert!(!merge.records[0].passes);
    }

    #[test]
    fn merge_rejects_duplicate_proposals() {
        let proposed = vec![feature("functional", "a", false), feature("functional", "a", true)];
        let err = merge_ledger(&[], &proposed).unwrap_err();
        assert!(matches!(err, MergeError::DuplicateRecord { .. }));
    }

    #[test]
    fn revert_completion_clears_the_flip() {
        let prev = vec![feature("functional", "a", false)];
        let mut merge = merge_ledger(&prev, &[feature("functional", "a", true)]).expect("merge");

        let reverted = merge.revert_completion().expect("reverted").description.clone();

        assert_eq!(reverted, "a");
        assert_eq!(merge.completed, None);
        assert_eq!(count_passing(&merge.records), 0);
    }
}
