//! CLI smoke tests for relopack.
//!
//! These tests verify that every command parses its arguments and fails
//! cleanly when its inputs are missing.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a Command for the relopack binary with no runtime configured.
fn relopack_cmd() -> Command {
  let mut cmd = cargo_bin_cmd!("relopack");
  cmd.env_remove("RELOPACK_RUNTIME_DIR");
  cmd.env_remove("RELOPACK_LAUNCHER_SRC");
  cmd
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  relopack_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  relopack_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("relopack"));
}

#[test]
fn subcommand_help_works() {
  for cmd in &["app", "library", "snapshot", "audit", "info"] {
    relopack_cmd()
      .arg(cmd)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

#[test]
fn unknown_subcommand_fails() {
  relopack_cmd().arg("bogus").assert().failure();
}

// =============================================================================
// Info
// =============================================================================

#[test]
fn info_reports_platform_and_unconfigured_runtime() {
  relopack_cmd()
    .arg("info")
    .assert()
    .success()
    .stdout(predicate::str::contains("Platform"))
    .stdout(predicate::str::contains("not configured"));
}

// =============================================================================
// Argument validation
// =============================================================================

#[test]
fn app_requires_output() {
  relopack_cmd()
    .arg("app")
    .assert()
    .failure()
    .stderr(predicate::str::contains("--output"));
}

#[test]
fn app_rejects_malformed_platform() {
  let temp = TempDir::new().unwrap();
  relopack_cmd()
    .args(["app", "--platform", "linux"])
    .arg("-o")
    .arg(temp.path().join("bundle"))
    .assert()
    .failure()
    .stderr(predicate::str::contains("--platform"));
}

#[test]
fn app_rejects_empty_executable_name() {
  let temp = TempDir::new().unwrap();
  relopack_cmd()
    .args(["app", "--executable", "=main"])
    .arg("-o")
    .arg(temp.path().join("bundle"))
    .assert()
    .failure()
    .stderr(predicate::str::contains("NAME=ENTRY"));
}

#[test]
fn app_fails_without_project_manifest() {
  let temp = TempDir::new().unwrap();
  relopack_cmd()
    .arg("app")
    .arg(temp.path())
    .arg("-o")
    .arg(temp.path().join("bundle"))
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to load project"));
}

#[test]
fn snapshot_fails_without_runtime() {
  let temp = TempDir::new().unwrap();
  std::fs::write(temp.path().join("relopack.toml"), "name = \"hello\"\n").unwrap();
  relopack_cmd()
    .arg("snapshot")
    .arg(temp.path())
    .arg("-o")
    .arg(temp.path().join("hello.img"))
    .assert()
    .failure()
    .stderr(predicate::str::contains("runtime"));
  assert!(!temp.path().join("hello.img").exists());
}

#[test]
fn audit_fails_on_missing_bundle() {
  let temp = TempDir::new().unwrap();
  relopack_cmd()
    .arg("audit")
    .arg(temp.path().join("missing"))
    .assert()
    .failure()
    .stderr(predicate::str::contains("not found"));
}
