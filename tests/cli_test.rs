//! CLI surface smoke tests

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help_lists_subcommands() {
    Command::cargo_bin("careline")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("watch"))
        .stdout(predicate::str::contains("send"))
        .stdout(predicate::str::contains("upload"))
        .stdout(predicate::str::contains("open"));
}

#[test]
fn test_open_requires_name() {
    Command::cargo_bin("careline")
        .unwrap()
        .args(["open", "/files/scan.jpg"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--name"));
}
