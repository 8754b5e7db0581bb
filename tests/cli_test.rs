//! Tests for the auto-git binary: exit codes and output modes.

mod common;

use std::path::Path;
use std::process::{Command, Output};

use common::{TestRepo, rules_fixture};

const ENV_VARS: &[&str] = &[
    "AUTO_GIT_DEBOUNCE_MS",
    "AUTO_GIT_HARD_STOP_MS",
    "AUTO_GIT_SKEW_SECS",
    "AUTO_GIT_MAX_FILES",
    "AUTO_GIT_MAX_BYTES",
    "AUTO_GIT_AUTHOR_NAME",
    "AUTO_GIT_AUTHOR_EMAIL",
    "AUTO_GIT_COMMIT_TIME",
    "RUST_LOG",
];

fn auto_git(repo: &Path, args: &[&str]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_auto-git"));
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd.arg("--repo")
        .arg(repo)
        .args(args)
        .output()
        .expect("Failed to run auto-git")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_not_a_repository_exits_2() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope");
    let output = auto_git(&missing, &["run-once"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error:"));
}

#[test]
fn test_malformed_rules_exit_2() {
    let repo = TestRepo::new();
    repo.write("a.txt", "a");
    let rules = rules_fixture("malformed.toml");
    let output = auto_git(repo.path(), &["--rules", rules.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));
    assert!(repo.head_oid().is_none());
}

#[test]
fn test_unknown_flag_is_usage_error() {
    let repo = TestRepo::new();
    let output = auto_git(repo.path(), &["--frobnicate"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_ambiguous_rules_exit_1() {
    let repo = TestRepo::new();
    repo.write("a.txt", "a");
    let rules = rules_fixture("ambiguous.toml");
    let output = auto_git(repo.path(), &["run-once", "--rules", rules.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).contains("[FAIL] ClassificationAmbiguous"));
    assert!(repo.head_oid().is_none());
}

#[test]
fn test_dry_run_json_report() {
    let repo = TestRepo::new();
    repo.write("notes/todo.txt", "milk");
    let output = auto_git(repo.path(), &["--dry-run", "--json"]);
    assert_eq!(output.status.code(), Some(0));

    let text = stdout(&output);
    let line = text.lines().next().expect("one report line");
    let value: serde_json::Value = serde_json::from_str(line).unwrap();
    assert_eq!(value["mode"], "DryRun");
    assert_eq!(value["drafts"].as_array().unwrap().len(), 1);
    assert!(value["result"]["applied"].as_array().unwrap().is_empty());
    assert!(repo.head_oid().is_none());
}

#[test]
fn test_default_command_commits_and_second_run_is_noop() {
    let repo = TestRepo::new();
    repo.write("src/main.rs", "fn main() {}");

    let output = auto_git(repo.path(), &[]);
    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output).contains("[DONE]"));
    assert_eq!(repo.log().len(), 1);
    assert!(repo.log()[0].starts_with("feat(src): add main.rs"));

    let output = auto_git(repo.path(), &["run-once"]);
    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output).contains("Nothing to commit"));
    assert_eq!(repo.log().len(), 1);
}

#[test]
fn test_invalid_commit_time_exits_2() {
    let repo = TestRepo::new();
    repo.write("a.txt", "a");
    let output = Command::new(env!("CARGO_BIN_EXE_auto-git"))
        .env("AUTO_GIT_COMMIT_TIME", "yesterday")
        .arg("--repo")
        .arg(repo.path())
        .output()
        .expect("Failed to run auto-git");
    assert_eq!(output.status.code(), Some(2));
    assert!(repo.head_oid().is_none());
}
