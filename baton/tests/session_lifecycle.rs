//! Multi-session tests against a real project directory.
//!
//! These drive `Coordinator::run` with the filesystem store and real git,
//! scripting only the model and the verifier, and check what a later session
//! (or a human) would find on disk: ledger, progress log and commit history.

use baton::core::progress::parse_entry;
use baton::core::types::{FeatureRecord, SessionKind, SessionState, Verification};
use baton::io::config::BatonConfig;
use baton::io::git::{Git, VersionControl};
use baton::io::ledger::parse_ledger;
use baton::io::lock::{LockMode, SessionLock};
use baton::io::provider::ModelProvider;
use baton::io::store::FsStore;
use baton::session::{Coordinator, SessionError};
use baton::test_support::{
    FailingProvider, FakeVerifier, ScriptedProvider, TestProject, feature, fenced,
};

fn ledger_json(records: &[FeatureRecord]) -> String {
    serde_json::to_string_pretty(records).expect("serialize ledger")
}

fn planned() -> Vec<FeatureRecord> {
    vec![
        feature("functional", "add item", false),
        feature("functional", "list items", false),
        feature("functional", "remove item", false),
    ]
}

/// `planned()` with the first `n` records passing.
fn planned_with_passing(n: usize) -> Vec<FeatureRecord> {
    planned()
        .into_iter()
        .enumerate()
        .map(|(i, mut record)| {
            record.passes = i < n;
            record
        })
        .collect()
}

fn init_response() -> String {
    [
        fenced("feature_list.json", &ledger_json(&planned())),
        fenced("init.sh", "#!/bin/sh\necho ready"),
        fenced("claude-progress.txt", "Planned a CLI todo app."),
    ]
    .join("\n")
}

fn coding_response(passing: usize, file: &str) -> String {
    [
        fenced(&format!("src/{file}.rs"), "pub fn run() {}"),
        fenced("feature_list.json", &ledger_json(&planned_with_passing(passing))),
    ]
    .join("\n")
}

fn coordinator<M: ModelProvider>(
    project: &TestProject,
    model: M,
) -> Coordinator<FsStore, Git, M, FakeVerifier> {
    Coordinator::new(
        project.store(),
        project.git(),
        model,
        FakeVerifier::new(Verification::Passed),
        project.paths.clone(),
        BatonConfig::default(),
    )
}

fn init_kind() -> SessionKind {
    SessionKind::Initialize {
        task: "build a CLI todo app".to_string(),
    }
}

fn coding_kind() -> SessionKind {
    SessionKind::Coding { instruction: None }
}

fn ledger(project: &TestProject) -> Vec<FeatureRecord> {
    parse_ledger(&project.read("feature_list.json").expect("ledger exists")).expect("parse ledger")
}

fn progress_lines(project: &TestProject) -> Vec<String> {
    project
        .read("claude-progress.txt")
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

fn commits(project: &TestProject) -> Vec<String> {
    project.git().recent_commits(50).expect("git log")
}

/// Initialization on an empty project: a ledger of unfinished features,
/// an executable startup script, one commit and one progress entry.
#[test]
fn initialization_lays_down_durable_state() {
    let project = TestProject::new();
    let session = coordinator(&project, ScriptedProvider::new(init_response()));

    let outcome = session.run(&init_kind()).expect("init session");

    assert_eq!(outcome.state, SessionState::Logged);
    let records = ledger(&project);
    assert!(!records.is_empty());
    assert!(records.iter().all(|record| !record.passes));

    let history = commits(&project);
    assert_eq!(history.len(), 1);
    assert!(history[0].ends_with("Initial commit: project setup"));

    let lines = progress_lines(&project);
    assert_eq!(lines.len(), 1);
    let entry = parse_entry(&lines[0]).expect("well-formed entry");
    assert!(entry.message.starts_with("initialize session complete"));
    assert!(project.read(".baton/config.toml").is_some());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(project.root().join("init.sh"))
            .expect("init.sh")
            .permissions()
            .mode();
        assert_ne!(mode & 0o111, 0, "init.sh should be executable");
    }
}

/// A coding session that completes one feature changes only that record's
/// `passes` flag, and leaves exactly one new commit and one new entry.
#[test]
fn coding_session_completes_exactly_one_feature() {
    let project = TestProject::new();
    let session = coordinator(
        &project,
        ScriptedProvider::sequence(vec![init_response(), coding_response(1, "add")]),
    );
    session.run(&init_kind()).expect("init session");
    let before = ledger(&project);
    let commits_before = commits(&project).len();
    let lines_before = progress_lines(&project).len();

    let outcome = session.run(&coding_kind()).expect("coding session");

    assert_eq!(outcome.completed_feature.as_deref(), Some("add item"));
    assert_eq!(outcome.verification, Verification::Passed);
    let after = ledger(&project);
    assert_eq!(after.len(), before.len());
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.key(), new.key());
        assert_eq!(old.steps, new.steps);
    }
    assert_eq!(after.iter().filter(|record| record.passes).count(), 1);

    let history = commits(&project);
    assert_eq!(history.len(), commits_before + 1);
    assert!(history[0].ends_with("Complete feature: add item"));
    assert_eq!(progress_lines(&project).len(), lines_before + 1);
    assert_eq!(
        project.read("workspace/src/add.rs").as_deref(),
        Some("pub fn run() {}\n")
    );
}

/// A failed model call leaves no trace: progress log byte-identical,
/// ledger untouched, no commit.
#[test]
fn model_failure_leaves_project_untouched() {
    let project = TestProject::new();
    coordinator(&project, ScriptedProvider::new(init_response()))
        .run(&init_kind())
        .expect("init session");
    let progress_before = project.read("claude-progress.txt");
    let ledger_before = project.read("feature_list.json");
    let commits_before = commits(&project);

    let err = coordinator(&project, FailingProvider::new("connection reset"))
        .run(&coding_kind())
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<SessionError>(),
        Some(SessionError::ModelCall { .. })
    ));
    assert_eq!(project.read("claude-progress.txt"), progress_before);
    assert_eq!(project.read("feature_list.json"), ledger_before);
    assert_eq!(commits(&project), commits_before);
}

/// A second session started while the lock is held is rejected before it
/// reads or writes anything.
#[test]
fn concurrent_session_is_rejected() {
    let project = TestProject::new();
    coordinator(&project, ScriptedProvider::new(init_response()))
        .run(&init_kind())
        .expect("init session");
    let ledger_before = project.read("feature_list.json");
    let _held =
        SessionLock::acquire(&project.paths.lock_path, LockMode::FailFast).expect("hold lock");

    let model = ScriptedProvider::new(coding_response(1, "add"));
    let session = coordinator(&project, model);
    let err = session.run(&coding_kind()).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<SessionError>(),
        Some(SessionError::Locked { .. })
    ));
    assert!(session.model().requests().is_empty());
    assert_eq!(project.read("feature_list.json"), ledger_before);
}

/// Over successive sessions the passing count never drops, the record set
/// never shrinks, and each session adds one progress entry and one commit.
#[test]
fn sessions_accumulate_monotonically() {
    let project = TestProject::new();
    let mut script = vec![init_response()];
    script.extend((1..=3).map(|n| coding_response(n, &format!("step{n}"))));
    let session = coordinator(&project, ScriptedProvider::sequence(script));
    session.run(&init_kind()).expect("init session");

    let mut passing = 0;
    for n in 1..=3 {
        session.run(&coding_kind()).expect("coding session");
        let records = ledger(&project);
        let now_passing = records.iter().filter(|record| record.passes).count();
        assert!(now_passing >= passing);
        assert_eq!(records.len(), planned().len());
        assert_eq!(progress_lines(&project).len(), n + 1);
        assert_eq!(commits(&project).len(), n + 1);
        passing = now_passing;
    }
    assert_eq!(passing, 3);

    let entries: Vec<_> = progress_lines(&project)
        .iter()
        .map(|line| parse_entry(line).expect("well-formed entry"))
        .collect();
    assert!(entries.windows(2).all(|pair| pair[0].timestamp <= pair[1].timestamp));
}

/// Marking two features complete in one session is rejected before any
/// durable write.
#[test]
fn two_completions_in_one_session_are_rejected() {
    let project = TestProject::new();
    let session = coordinator(
        &project,
        ScriptedProvider::sequence(vec![init_response(), coding_response(2, "both")]),
    );
    session.run(&init_kind()).expect("init session");
    let ledger_before = project.read("feature_list.json");
    let progress_before = project.read("claude-progress.txt");
    let commits_before = commits(&project);

    let err = session.run(&coding_kind()).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<SessionError>(),
        Some(SessionError::TooManyCompletions { count: 2, .. })
    ));
    assert_eq!(project.read("feature_list.json"), ledger_before);
    assert_eq!(project.read("claude-progress.txt"), progress_before);
    assert_eq!(commits(&project), commits_before);
    assert!(project.read("workspace/src/both.rs").is_none());
}

/// A completion the verifier rejects is not recorded, but the session
/// still commits and logs.
#[test]
fn rejected_verification_keeps_feature_pending() {
    let project = TestProject::new();
    coordinator(&project, ScriptedProvider::new(init_response()))
        .run(&init_kind())
        .expect("init session");

    let session = Coordinator::new(
        project.store(),
        project.git(),
        ScriptedProvider::new(coding_response(1, "add")),
        FakeVerifier::new(Verification::Failed),
        project.paths.clone(),
        BatonConfig::default(),
    );
    let outcome = session.run(&coding_kind()).expect("coding session");

    assert_eq!(outcome.verification, Verification::Failed);
    assert!(outcome.completed_feature.is_none());
    assert!(ledger(&project).iter().all(|record| !record.passes));
    let lines = progress_lines(&project);
    let last = parse_entry(lines.last().expect("entry")).expect("well-formed entry");
    assert!(last.message.contains("verification failed"));
    assert!(commits(&project)[0].ends_with("Update: progress from coding session"));
}
