//! CLI integration tests for li3ds-provision.
//!
//! These tests verify command-line argument parsing, help output,
//! and exit codes for configuration errors. None of them needs a database:
//! configuration is loaded and validated before connecting.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the li3ds-provision binary.
fn cmd() -> Command {
    Command::cargo_bin("li3ds-provision").unwrap()
}

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", contents).unwrap();
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
        .stdout(predicate::str::contains("drivers"))
        .stdout(predicate::str::contains("create-server"))
        .stdout(predicate::str::contains("create-table"))
        .stdout(predicate::str::contains("import-schema"))
        .stdout(predicate::str::contains("create-view"))
        .stdout(predicate::str::contains("health-check"))
        .stdout(predicate::str::contains("request"));
}

#[test]
fn test_create_table_help() {
    cmd()
        .args(["create-table", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--server"))
        .stdout(predicate::str::contains("--srid"))
        .stdout(predicate::str::contains("--option"));
}

#[test]
fn test_create_view_help() {
    cmd()
        .args(["create-view", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--trajectory"))
        .stdout(predicate::str::contains("--srid"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("li3ds-provision"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_log_format_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"));
}

#[test]
fn test_verbosity_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_config_default_path() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

// =============================================================================
// Argument Parsing Tests
// =============================================================================

#[test]
fn test_option_without_equals_is_rejected() {
    cmd()
        .args(["create-server", "bags", "--driver", "fdwli3ds.Rosbag", "-o", "rosbag"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("key=value"));
}

#[test]
fn test_import_schema_requires_remote() {
    cmd()
        .args(["import-schema", "capture", "--server", "bags"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--remote"));
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
fn test_missing_database_section_exits_with_code_1() {
    let file = config_file("provisioning:\n  fdw: multicorn\n");

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "drivers"])
        .assert()
        .code(1);
}

#[test]
fn test_invalid_ssl_mode_exits_with_code_1() {
    let file = config_file(
        "database:\n  host: localhost\n  database: li3ds\n  user: li3ds\n  ssl_mode: sometimes\n",
    );

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "servers"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("ssl_mode"));
}

#[test]
fn test_invalid_registry_identifier_exits_with_code_1() {
    let file = config_file(
        "database:\n  host: localhost\n  database: li3ds\n  user: li3ds\nprovisioning:\n  registry_table: \"\"\n",
    );

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "tables"])
        .assert()
        .code(1);
}
