//! The snapshot compiler collaborator.
//!
//! The language toolchain is external. [`CommandToolchain`] drives it as a
//! process with this command line:
//!
//! ```text
//! <compiler> --output <file> --mode <incremental|full> --project <dir>
//!            [--base-image <img>] [--modules A,B] [--cpu-target <t>]
//!            -- <entry scripts...>
//! ```

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use super::types::{ModuleFilter, SnapshotMode, SnapshotRequest};
use crate::runtime::RuntimeInstall;
use crate::util::hash::{ContentHash, hash_file};

/// Failure reported by the toolchain, with its diagnostic output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainFailure {
  pub diagnostic: String,
  pub code: Option<i32>,
}

pub trait Toolchain {
  /// Content hash of the image incremental snapshots are layered on, if present.
  fn base_image(&self) -> Option<ContentHash>;

  /// Compile `request` into a snapshot at `output`.
  ///
  /// `output` does not exist beforehand; it is only trusted after `Ok`.
  fn compile_snapshot(&self, request: &SnapshotRequest, output: &Path) -> Result<(), ToolchainFailure>;
}

/// Runs the runtime's compiler as a child process.
#[derive(Debug, Clone)]
pub struct CommandToolchain {
  program: PathBuf,
  base_image: PathBuf,
}

impl CommandToolchain {
  pub fn new(program: impl Into<PathBuf>, base_image: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
      base_image: base_image.into(),
    }
  }

  pub fn from_runtime(runtime: &RuntimeInstall) -> Self {
    Self::new(&runtime.compiler, &runtime.base_image)
  }

  pub fn program(&self) -> &Path {
    &self.program
  }

  fn args(&self, request: &SnapshotRequest, output: &Path) -> Vec<String> {
    let mut args = vec![
      "--output".to_string(),
      output.display().to_string(),
      "--mode".to_string(),
      request.mode.as_str().to_string(),
      "--project".to_string(),
      request.project_root.display().to_string(),
    ];

    if request.mode == SnapshotMode::Incremental {
      args.push("--base-image".to_string());
      args.push(self.base_image.display().to_string());
    }
    if let ModuleFilter::Only(modules) = &request.module_filter {
      args.push("--modules".to_string());
      args.push(modules.iter().cloned().collect::<Vec<_>>().join(","));
    }
    if let Some(cpu) = &request.cpu_target {
      args.push("--cpu-target".to_string());
      args.push(cpu.clone());
    }

    args.push("--".to_string());
    args.extend(request.entry_scripts.iter().map(|s| s.display().to_string()));
    args
  }
}

impl Toolchain for CommandToolchain {
  fn base_image(&self) -> Option<ContentHash> {
    hash_file(&self.base_image).ok()
  }

  fn compile_snapshot(&self, request: &SnapshotRequest, output: &Path) -> Result<(), ToolchainFailure> {
    let args = self.args(request, output);
    info!(program = %self.program.display(), mode = %request.mode, "compiling snapshot");
    debug!(args = ?args, "toolchain arguments");

    let result = Command::new(&self.program)
      .args(&args)
      .current_dir(&request.project_root)
      // Value is 315532800 = January 1, 1980 00:00:00 UTC (ZIP epoch)
      .env("SOURCE_DATE_EPOCH", "315532800")
      .output();

    let output = match result {
      Ok(output) => output,
      Err(e) => {
        return Err(ToolchainFailure {
          diagnostic: format!("failed to start {}: {}", self.program.display(), e),
          code: None,
        });
      }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
      debug!(stdout = %stdout.trim(), "toolchain output");
    }

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
      return Err(ToolchainFailure {
        diagnostic: if stderr.is_empty() { stdout.trim().to_string() } else { stderr },
        code: output.status.code(),
      });
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::platform::Platform;

  fn request(mode: SnapshotMode, filter: ModuleFilter) -> SnapshotRequest {
    SnapshotRequest {
      project_root: PathBuf::from("/src/app"),
      entry_scripts: vec![PathBuf::from("/src/app/main.src"), PathBuf::from("/src/app/warm.src")],
      mode,
      module_filter: filter,
      cpu_target: Some("generic".to_string()),
      platform: Platform::current().unwrap(),
    }
  }

  #[test]
  fn full_mode_args_omit_base_image() {
    let tc = CommandToolchain::new("/rt/bin/cc", "/rt/lib/base.img");
    let args = tc.args(&request(SnapshotMode::Full, ModuleFilter::only(["Text", "Core"])), Path::new("/out/snap"));

    assert!(!args.contains(&"--base-image".to_string()));
    let modules_at = args.iter().position(|a| a == "--modules").unwrap();
    assert_eq!(args[modules_at + 1], "Core,Text");
    let sep = args.iter().position(|a| a == "--").unwrap();
    assert_eq!(&args[sep + 1..], &["/src/app/main.src", "/src/app/warm.src"]);
  }

  #[test]
  fn incremental_args_name_base_image() {
    let tc = CommandToolchain::new("/rt/bin/cc", "/rt/lib/base.img");
    let args = tc.args(&request(SnapshotMode::Incremental, ModuleFilter::All), Path::new("/out/snap"));

    let at = args.iter().position(|a| a == "--base-image").unwrap();
    assert_eq!(args[at + 1], "/rt/lib/base.img");
    assert!(!args.contains(&"--modules".to_string()));
    assert!(args.contains(&"generic".to_string()));
  }

  #[test]
  fn missing_compiler_reports_failure() {
    let tc = CommandToolchain::new("/definitely/not/a/compiler", "/nope");
    let temp = tempfile::TempDir::new().unwrap();
    let mut req = request(SnapshotMode::Full, ModuleFilter::All);
    req.project_root = temp.path().to_path_buf();

    let err = tc.compile_snapshot(&req, &temp.path().join("out")).unwrap_err();
    assert!(err.code.is_none());
    assert!(err.diagnostic.contains("failed to start"));
    assert!(tc.base_image().is_none());
  }

  #[cfg(unix)]
  #[test]
  fn nonzero_exit_carries_stderr() {
    use std::os::unix::fs::PermissionsExt;

    let temp = tempfile::TempDir::new().unwrap();
    let script = temp.path().join("cc");
    std::fs::write(&script, "#!/bin/sh\necho 'UndefVarError: Text' >&2\nexit 3\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let tc = CommandToolchain::new(&script, "/nope");
    let mut req = request(SnapshotMode::Full, ModuleFilter::All);
    req.project_root = temp.path().to_path_buf();

    let err = tc.compile_snapshot(&req, &temp.path().join("out")).unwrap_err();
    assert_eq!(err.code, Some(3));
    assert_eq!(err.diagnostic, "UndefVarError: Text");
  }
}
