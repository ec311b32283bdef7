use predicates::prelude::*;

use super::common::{TestEnv, entries, json_stdout, runtime_lib_name};

#[test]
fn test_library_bundle_layout() {
  let env = TestEnv::new();
  env.write_file("project/include/hello.h", "int hello_main(int, const char**);\n");
  let out = env.out("hellolib");

  let output = env
    .relopack_cmd()
    .arg("library")
    .arg(env.project_path())
    .arg("-o")
    .arg(&out)
    .arg("--header")
    .arg(env.project_path().join("include/hello.h"))
    .arg("--json")
    .output()
    .unwrap();
  assert!(
    output.status.success(),
    "library failed: {}",
    String::from_utf8_lossy(&output.stderr)
  );

  let json = json_stdout(&output);
  assert_eq!(json["kind"], "library");
  assert_eq!(json["name"], "hello");
  assert_eq!(json["executables"].as_array().unwrap().len(), 0);

  assert!(out.join("depot").join("bundle.json").is_file());
  assert!(out.join("include").join("hello.h").is_file());
  assert!(!out.join("bin").exists() || entries(&out.join("bin")).is_empty());

  let libs = entries(&out.join("lib"));
  assert!(libs.iter().any(|l| l == runtime_lib_name()), "libs: {:?}", libs);
  assert!(libs.iter().any(|l| l.starts_with("libhello")), "libs: {:?}", libs);
}

#[test]
fn test_library_refuses_non_empty_output_without_force() {
  let env = TestEnv::new();
  let out = env.out("hellolib");
  env.write_file("out/hellolib/keep.txt", "user data");

  env
    .relopack_cmd()
    .arg("library")
    .arg(env.project_path())
    .arg("-o")
    .arg(&out)
    .assert()
    .failure()
    .stderr(predicate::str::contains("--force"));
  assert!(out.join("keep.txt").is_file());

  env
    .relopack_cmd()
    .arg("library")
    .arg(env.project_path())
    .arg("-o")
    .arg(&out)
    .arg("--force")
    .assert()
    .success()
    .stdout(predicate::str::contains("Bundle created"));
  assert!(!out.join("keep.txt").exists());
  assert!(out.join("depot").join("bundle.json").is_file());
}

#[test]
fn test_library_bundle_audits_clean_of_prefix_paths() {
  let env = TestEnv::new();
  let out = env.out("hellolib");

  env
    .relopack_cmd()
    .arg("library")
    .arg(env.project_path())
    .arg("-o")
    .arg(&out)
    .assert()
    .success();

  let output = env.relopack_cmd().arg("audit").arg(&out).arg("--json").output().unwrap();
  assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

  let json = json_stdout(&output);
  let prefixes = json["prefixes"].as_array().unwrap();
  assert!(!prefixes.is_empty());
  assert_eq!(json["findings"].as_array().unwrap().len(), 0);
}
