//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Fake snapshot compiler: writes a small image to the `--output` argument.
///
/// Exits 3 with a diagnostic when the project contains a `broken` marker.
#[cfg(unix)]
const FAKE_COMPILER: &str = r#"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output) out="$2"; shift 2 ;;
    --) shift; break ;;
    *) shift ;;
  esac
done
if [ -e broken ]; then
  echo "syntax error in src/hello.src" >&2
  exit 3
fi
printf '\177IMG\000compiled' > "$out"
"#;

/// Isolated test environment.
///
/// Each test gets its own project, runtime installation and snapshot cache.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  /// A project named `hello` with one entry script and no dependencies.
  pub fn new() -> Self {
    let env = Self::empty();
    env.write_file("project/relopack.toml", "name = \"hello\"\nentry_script = \"src/hello.src\"\n");
    env.write_file("project/src/hello.src", "main() = println(\"hello\")\n");
    env
  }

  /// Create an empty test environment.
  pub fn empty() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  pub fn root(&self) -> PathBuf {
    dunce::canonicalize(self.temp.path()).unwrap()
  }

  pub fn project_path(&self) -> PathBuf {
    self.root().join("project")
  }

  /// Output location under the temp directory; not created.
  pub fn out(&self, name: &str) -> PathBuf {
    self.root().join("out").join(name)
  }

  /// Cache path for incremental snapshots.
  pub fn cache_path(&self) -> PathBuf {
    let p = self.temp.path().join("cache");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// A runtime installation with a base image, one shared library and the
  /// fake compiler.
  #[cfg(unix)]
  pub fn runtime_path(&self) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let root = self.root().join("runtime");
    let lib = root.join("lib");
    std::fs::create_dir_all(&lib).unwrap();
    std::fs::write(lib.join("base.img"), "base").unwrap();
    std::fs::write(lib.join(runtime_lib_name()), "runtime").unwrap();

    let compiler = root.join("bin").join("relopack-compile");
    std::fs::create_dir_all(compiler.parent().unwrap()).unwrap();
    std::fs::write(&compiler, FAKE_COMPILER).unwrap();
    std::fs::set_permissions(&compiler, std::fs::Permissions::from_mode(0o755)).unwrap();
    root
  }

  /// Get a pre-configured Command for the relopack binary.
  ///
  /// Sets environment variables for isolated testing:
  /// - `RELOPACK_CACHE`: Isolated snapshot cache
  /// - `RELOPACK_RUNTIME_DIR`: The fake runtime (unix only)
  pub fn relopack_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("relopack");
    cmd.env("RELOPACK_CACHE", self.cache_path());
    cmd.env_remove("RELOPACK_TOOLCHAIN");
    #[cfg(unix)]
    cmd.env("RELOPACK_RUNTIME_DIR", self.runtime_path());
    cmd
  }
}

#[cfg(unix)]
pub fn runtime_lib_name() -> &'static str {
  if cfg!(target_os = "macos") { "libruntime.dylib" } else { "libruntime.so" }
}

/// Parse stdout of a `--json` run.
pub fn json_stdout(output: &std::process::Output) -> serde_json::Value {
  serde_json::from_slice(&output.stdout)
    .unwrap_or_else(|e| panic!("stdout is not JSON ({}): {}", e, String::from_utf8_lossy(&output.stdout)))
}

/// Names of the entries directly inside `dir`, sorted.
pub fn entries(dir: &Path) -> Vec<String> {
  let mut names: Vec<String> = std::fs::read_dir(dir)
    .unwrap()
    .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
    .collect();
  names.sort();
  names
}
