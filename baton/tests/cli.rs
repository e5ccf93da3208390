//! CLI tests for the `baton` binary.
//!
//! Spawns the binary against temp project roots and checks exit codes and
//! the read-only commands' output. No test here reaches a model.

use std::process::{Command, Output};

use baton::exit_codes;

fn baton(root: &std::path::Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_baton"))
        .current_dir(root)
        .env_remove("BATON_API_KEY")
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("run baton")
}

#[test]
fn bearings_on_empty_root_reports_missing_ledger() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = baton(temp.path(), &["bearings"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("bearings json");
    assert_eq!(json["ledger_status"], "missing");
    assert_eq!(json["features_pending"], serde_json::json!([]));
    assert!(!temp.path().join("claude-progress.txt").exists());
}

#[test]
fn validate_flags_malformed_ledger() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = baton(temp.path(), &["validate"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&output.stdout).contains("0 features"));

    std::fs::write(temp.path().join("feature_list.json"), "{ not json").expect("write ledger");
    let output = baton(temp.path(), &["validate"]);
    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    assert!(String::from_utf8_lossy(&output.stderr).contains("feature_list.json"));
}

#[test]
fn session_without_api_key_fails_before_touching_the_project() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = baton(temp.path(), &["init", "build a CLI todo app"]);

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    assert!(String::from_utf8_lossy(&output.stderr).contains("BATON_API_KEY"));
    assert!(!temp.path().join("feature_list.json").exists());
    assert!(!temp.path().join(".baton").exists());
}

#[test]
fn root_flag_points_at_another_directory() {
    let temp = tempfile::tempdir().expect("tempdir");
    let project = temp.path().join("project");
    std::fs::create_dir_all(&project).expect("create project");
    std::fs::write(
        project.join("feature_list.json"),
        r#"[{"category":"functional","description":"add item","steps":["run add"],"passes":true}]"#,
    )
    .expect("write ledger");

    let root = project.to_str().expect("utf-8 path");
    let output = baton(temp.path(), &["--root", root, "bearings"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("bearings json");
    assert_eq!(json["ledger_status"], "ok");
    assert_eq!(json["features_completed"][0]["description"], "add item");
}
