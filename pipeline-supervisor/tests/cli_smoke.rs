//! Binary smoke tests for the `supervisor` CLI — runs the actual compiled
//! binary via `assert_cmd` so a broken build or a subcommand that silently
//! does nothing both show up here.

use assert_cmd::Command;
use predicates::prelude::*;

#[allow(deprecated)]
fn supervisor() -> Command {
    Command::cargo_bin("supervisor").unwrap()
}

#[test]
fn binary_exists() {
    supervisor();
}

#[test]
fn help_flag() {
    supervisor()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Polls issues and schedules workers"));
}

#[test]
fn list_on_empty_status_dir_prints_nothing_and_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    supervisor()
        .arg("--base-dir")
        .arg(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn missing_subcommand_is_an_error() {
    supervisor().assert().failure();
}
