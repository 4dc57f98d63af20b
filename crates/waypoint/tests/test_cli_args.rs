//! CLI argument parsing tests for Waypoint

mod common;

use assert_cmd::Command;
use predicates::prelude::*;

fn waypoint() -> Command {
    Command::new(env!("CARGO_BIN_EXE_waypoint"))
}

#[test]
fn test_help_flag() {
    let mut cmd = waypoint();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("A tool-using agent that delegates to other agents"))
        .stdout(predicate::str::contains("--verbose"))
        .stdout(predicate::str::contains("--version"));
}

#[test]
fn test_version_flag() {
    let mut cmd = waypoint();
    cmd.arg("--version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_no_args_shows_help() {
    let mut cmd = waypoint();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

// ============================================================================
// Subcommand help
// ============================================================================

#[test]
fn test_init_command_help() {
    let mut cmd = waypoint();
    cmd.args(["init", "--help"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Initialize config"));
}

#[test]
fn test_status_command_help() {
    let mut cmd = waypoint();
    cmd.args(["status", "--help"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Show configuration"));
}

#[test]
fn test_chat_command_help() {
    let mut cmd = waypoint();
    cmd.args(["chat", "--help"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Chat with the agent"))
        .stdout(predicate::str::contains("-m, --message"))
        .stdout(predicate::str::contains("-r, --remote <URL>"));
}

#[test]
fn test_serve_command_help() {
    let mut cmd = waypoint();
    cmd.args(["serve", "--help"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Host the agent"))
        .stdout(predicate::str::contains("-p, --port"));
}

#[test]
fn test_verbose_is_global() {
    let mut cmd = waypoint();
    cmd.args(["status", "--verbose", "--help"]);
    cmd.assert().success();
}

// ============================================================================
// Invalid input
// ============================================================================

#[test]
fn test_invalid_command() {
    let mut cmd = waypoint();
    cmd.arg("engage");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_invalid_port() {
    let mut cmd = waypoint();
    cmd.args(["serve", "--port", "seventy"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn test_remote_requires_value() {
    let mut cmd = waypoint();
    cmd.args(["chat", "--remote"]);
    cmd.assert().failure();
}
