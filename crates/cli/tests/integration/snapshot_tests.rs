use predicates::prelude::*;

use super::common::{TestEnv, json_stdout};

#[test]
fn test_snapshot_writes_full_image() {
  let env = TestEnv::new();
  let out = env.out("hello.img");

  let output = env
    .relopack_cmd()
    .arg("snapshot")
    .arg(env.project_path())
    .arg("-o")
    .arg(&out)
    .arg("--json")
    .output()
    .unwrap();
  assert!(
    output.status.success(),
    "snapshot failed: {}",
    String::from_utf8_lossy(&output.stderr)
  );

  assert_eq!(std::fs::read(&out).unwrap(), b"\x7fIMG\x00compiled");
  let json = json_stdout(&output);
  assert_eq!(json["mode"], "full");
  assert!(json["parent"].is_null());
}

#[test]
fn test_snapshot_incremental_records_parent() {
  let env = TestEnv::new();
  let out = env.out("hello.img");

  let output = env
    .relopack_cmd()
    .arg("snapshot")
    .arg(env.project_path())
    .arg("-o")
    .arg(&out)
    .args(["--incremental", "--json"])
    .output()
    .unwrap();
  assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

  let json = json_stdout(&output);
  assert_eq!(json["mode"], "incremental");
  assert!(json["parent"].is_string());
}

#[test]
fn test_snapshot_incremental_with_filter_is_rejected() {
  let env = TestEnv::new();
  let out = env.out("hello.img");

  env
    .relopack_cmd()
    .arg("snapshot")
    .arg(env.project_path())
    .arg("-o")
    .arg(&out)
    .args(["--incremental", "--filter-stdlibs"])
    .assert()
    .failure();
  assert!(!out.exists());
}

#[test]
fn test_snapshot_failure_reports_diagnostic() {
  let env = TestEnv::new();
  env.write_file("project/broken", "");
  let out = env.out("hello.img");

  env
    .relopack_cmd()
    .arg("snapshot")
    .arg(env.project_path())
    .arg("-o")
    .arg(&out)
    .assert()
    .failure()
    .stderr(predicate::str::contains("syntax error in src/hello.src"));
  assert!(!out.exists());
}

#[test]
fn test_snapshot_text_summary() {
  let env = TestEnv::new();

  env
    .relopack_cmd()
    .arg("snapshot")
    .arg(env.project_path())
    .arg("-o")
    .arg(env.out("hello.img"))
    .assert()
    .success()
    .stdout(predicate::str::contains("Snapshot written"))
    .stdout(predicate::str::contains("Mode: full"));
}
