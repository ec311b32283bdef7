use predicates::prelude::*;

use super::common::{TestEnv, json_stdout};

/// A hand-built bundle with no manifest and one config file.
fn bundle_with_config(env: &TestEnv, config: &str) -> std::path::PathBuf {
  env.write_file("bundle/lib/.keep", "");
  env.write_file("bundle/share/app.conf", config);
  env.root().join("bundle")
}

#[test]
fn test_audit_clean_bundle() {
  let env = TestEnv::empty();
  let bundle = bundle_with_config(&env, "greeting = hello\n");

  env
    .relopack_cmd()
    .arg("audit")
    .arg(&bundle)
    .assert()
    .success()
    .stdout(predicate::str::contains("No relocatability warnings"));
}

#[test]
fn test_audit_reports_dangling_placeholder() {
  let env = TestEnv::empty();
  let bundle = bundle_with_config(&env, "plugin = ${BUNDLE_ROOT}/lib/libplugin.so\n");

  let output = env.relopack_cmd().arg("audit").arg(&bundle).arg("--json").output().unwrap();
  assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

  let json = json_stdout(&output);
  let findings = json["findings"].as_array().unwrap();
  assert_eq!(findings.len(), 1);
  assert_eq!(findings[0]["kind"], "warning");
  assert_eq!(findings[0]["category"], "dangling");
}

#[test]
fn test_audit_resolved_placeholder_is_not_a_warning() {
  let env = TestEnv::empty();
  let bundle = bundle_with_config(&env, "keep = ${BUNDLE_ROOT}/lib/.keep\n");

  let output = env.relopack_cmd().arg("audit").arg(&bundle).arg("--json").output().unwrap();
  assert!(output.status.success());

  let json = json_stdout(&output);
  let findings = json["findings"].as_array().unwrap();
  assert_eq!(findings.len(), 1);
  assert_eq!(findings[0]["kind"], "rewritten");
}

#[cfg(unix)]
#[test]
fn test_audit_warns_about_given_prefix_but_succeeds() {
  let env = TestEnv::empty();
  let build_dir = env.root().join("build-machine");
  let bundle = bundle_with_config(&env, &format!("data = {}/share/data.bin\n", build_dir.display()));

  env
    .relopack_cmd()
    .arg("audit")
    .arg(&bundle)
    .arg("--prefix")
    .arg(&build_dir)
    .assert()
    .success()
    .stderr(predicate::str::contains("1 relocatability warning"))
    .stdout(predicate::str::contains("app.conf"));
}
