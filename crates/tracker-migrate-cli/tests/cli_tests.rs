//! CLI integration tests for tracker-migrate.
//!
//! These tests verify command-line argument parsing, help output, the
//! commands that work without a database, and exit codes for various error
//! conditions.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

/// Get a command for the tracker-migrate binary.
fn cmd() -> Command {
    Command::cargo_bin("tracker-migrate").unwrap()
}

const VALID_CONFIG: &str = "\
source:
  host: localhost
  database: mantis_old
  user: reader
  password: secret
target:
  host: localhost
  database: mantis_new
  user: writer
  password: secret
";

fn config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", content).unwrap();
    file
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--project"))
        .stdout(predicate::str::contains("--only-project"))
        .stdout(predicate::str::contains("--clean"))
        .stdout(predicate::str::contains("--force"))
        .stdout(predicate::str::contains("--append"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tracker-migrate"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_global_flags_and_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"))
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

#[test]
fn test_short_config_flag() {
    cmd()
        .args(["-c", "some_config.yaml", "--help"])
        .assert()
        .success();
}

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_7() {
    // Missing file is an IO error (code 7), not config error (code 1)
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "health-check"])
        .assert()
        .code(7);
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let file = config_file("invalid: yaml: content: [\n");
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_empty_config_exits_with_code_1() {
    let file = NamedTempFile::new().unwrap();
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "plan"])
        .assert()
        .code(1);
}

#[test]
fn test_missing_required_fields_exits_with_code_1() {
    let file = config_file("source:\n  type: mysql\n");
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "plan"])
        .assert()
        .code(1);
}

#[test]
fn test_same_source_and_target_exits_with_code_1() {
    let file = config_file(&VALID_CONFIG.replace("mantis_new", "mantis_old"));
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "plan"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("cannot be the same database"));
}

#[test]
fn test_force_without_clean_exits_with_code_1() {
    let file = config_file(VALID_CONFIG);
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "run", "--force", "--dry-run"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("force"));
}

#[test]
fn test_cyclic_graph_exits_with_code_1() {
    let config = format!(
        "{}{}",
        VALID_CONFIG,
        "\
entities:
  - name: a
    table: a_table
    foreign_keys: [{ column: b_id, references: b }]
  - name: b
    table: b_table
    foreign_keys: [{ column: a_id, references: a }]
memberships: []
"
    );
    let file = config_file(&config);
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "plan"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("a -> b -> a"));
}

#[test]
fn test_duplicate_selected_project_exits_with_code_1() {
    let file = config_file(VALID_CONFIG);
    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "run",
            "--only-project",
            "Alpha",
            "--only-project",
            "Alpha",
            "--dry-run",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("listed twice"));
}

// =============================================================================
// Commands That Need No Database
// =============================================================================

#[test]
fn test_plan_prints_mantis_order() {
    let file = config_file(VALID_CONFIG);
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "plan"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1. user (mantis_user_table)"))
        .stdout(predicate::str::contains("second pass: duplicate_id -> bug"));
}

#[test]
fn test_plan_as_json() {
    let file = config_file(VALID_CONFIG);
    let output = cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "--output-json",
            "plan",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    let plan: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(plan["steps"][0]["kind"], "user");
    assert_eq!(plan["steps"].as_array().unwrap().len(), 19);
}

#[test]
fn test_dry_run_does_not_connect() {
    // The configured hosts do not exist; a dry run must not try them
    let file = config_file(&VALID_CONFIG.replace("localhost", "db.invalid"));
    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "run",
            "--project",
            "Legacy",
            "--dry-run",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry run completed"));
}
