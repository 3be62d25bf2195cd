//! CLI integration tests for hearth
//!
//! Tests the hearth CLI commands end-to-end using assert_cmd, each against
//! its own configuration directory.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Command isolated from the user's configuration and environment
#[allow(deprecated)]
fn hearth_cmd(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("hearth").unwrap();
    cmd.env("HEARTH_CONFIG_DIR", config_dir.path());
    cmd.env_remove("OLLAMA_HOST");
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_config_path_uses_config_dir() {
    let dir = TempDir::new().unwrap();
    let expected = dir.path().join("config.toml");

    hearth_cmd(&dir)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains(expected.display().to_string()));
}

#[test]
fn test_config_set_then_get() {
    let dir = TempDir::new().unwrap();

    hearth_cmd(&dir)
        .args(["config", "set", "model.default", "llama3.2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Set model.default = llama3.2"));

    hearth_cmd(&dir)
        .args(["config", "get", "model.default"])
        .assert()
        .success()
        .stdout(predicate::str::diff("llama3.2\n"));

    assert!(dir.path().join("config.toml").exists());
}

#[test]
fn test_config_heartbeat_interval_round_trips_as_humantime() {
    let dir = TempDir::new().unwrap();

    hearth_cmd(&dir)
        .args(["--quiet", "config", "set", "heartbeat.interval", "30m"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    hearth_cmd(&dir)
        .args(["config", "get", "heartbeat.interval"])
        .assert()
        .success()
        .stdout(predicate::str::contains("30m"));
}

#[test]
fn test_config_list_shows_defaults() {
    let dir = TempDir::new().unwrap();

    hearth_cmd(&dir)
        .args(["config", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("language = English"))
        .stdout(predicate::str::contains("model.default = qwen3:8b"))
        .stdout(predicate::str::contains("session.keep_recent = 10"));
}

#[test]
fn test_config_unknown_key_fails() {
    let dir = TempDir::new().unwrap();

    hearth_cmd(&dir)
        .args(["config", "get", "no.such.key"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown configuration key"));
}

#[test]
fn test_config_rejects_invalid_values() {
    let dir = TempDir::new().unwrap();

    hearth_cmd(&dir)
        .args(["config", "set", "backend.base_url", "localhost:11434"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("http://"));

    hearth_cmd(&dir)
        .args(["config", "set", "session.keep_recent", "0"])
        .assert()
        .failure();
}

#[test]
fn test_config_reset_restores_defaults() {
    let dir = TempDir::new().unwrap();

    hearth_cmd(&dir)
        .args(["config", "set", "language", "German"])
        .assert()
        .success();

    hearth_cmd(&dir)
        .args(["config", "reset"])
        .assert()
        .success()
        .stdout(predicate::str::contains("reset to defaults"));

    hearth_cmd(&dir)
        .args(["config", "get", "language"])
        .assert()
        .success()
        .stdout(predicate::str::diff("English\n"));
}

#[test]
fn test_sessions_list_when_empty() {
    let dir = TempDir::new().unwrap();

    hearth_cmd(&dir)
        .args(["sessions", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No sessions yet."));
}

#[test]
fn test_sessions_show_unknown_id_fails() {
    let dir = TempDir::new().unwrap();

    hearth_cmd(&dir)
        .args(["sessions", "show", "20260101-000000-abcd"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("20260101-000000-abcd"));
}

#[test]
fn test_ask_without_question_fails() {
    let dir = TempDir::new().unwrap();

    hearth_cmd(&dir)
        .arg("ask")
        .write_stdin("   \n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No question given"));
}

#[test]
fn test_models_reports_unreachable_backend() {
    let dir = TempDir::new().unwrap();

    hearth_cmd(&dir)
        .args(["--ollama-url", "http://127.0.0.1:9", "models"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Cannot reach Ollama at http://127.0.0.1:9"));
}

#[test]
fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();

    hearth_cmd(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("ask"))
        .stdout(predicate::str::contains("sessions"))
        .stdout(predicate::str::contains("config"));
}
