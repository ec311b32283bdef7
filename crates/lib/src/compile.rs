//! Per-bundle launcher compilation.
//!
//! The launcher crate is built once per executable with the program library
//! name and entry symbol baked in as compile-time environment variables, and
//! linked with a run path pointing at the bundle's library directory.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::{debug, info};

use crate::consts::{ENTRY_SYMBOL_ENV, LAUNCHER_SRC_ENV, PROGRAM_LIBNAME_ENV, RUNTIME_LIBNAME_ENV};
use crate::layout::LIB_DIR;
use crate::platform::Os;
use crate::platform::paths::launcher_target_dir;

/// Binary name of the launcher crate.
pub const LAUNCHER_BIN: &str = "relopack-launcher";

#[derive(Debug, Error)]
pub enum CompileError {
  #[error("launcher sources not found at {0} (set RELOPACK_LAUNCHER_SRC)")]
  SourceNotFound(PathBuf),

  #[error("failed to start {program}: {source}")]
  Spawn {
    program: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("launcher compilation failed (exit code {code:?}):\n{diagnostic}")]
  Failed { code: Option<i32>, diagnostic: String },

  #[error("compiler reported success but {0} does not exist")]
  MissingOutput(PathBuf),

  #[error("failed to copy launcher to {path}: {source}")]
  Copy {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// What one launcher is built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherSpec {
  pub executable: String,
  /// File name the loader is asked for.
  pub program_library: String,
  pub entry: String,
  pub runtime_library: String,
  pub os: Os,
}

pub trait LauncherCompiler {
  /// Build a launcher for `spec` and write the binary to `output`.
  fn compile(&self, spec: &LauncherSpec, output: &Path) -> Result<(), CompileError>;
}

/// Builds the launcher crate with `cargo build --release`.
#[derive(Debug, Clone)]
pub struct CargoLauncherCompiler {
  cargo: PathBuf,
  source_dir: PathBuf,
  target_dir: PathBuf,
}

impl CargoLauncherCompiler {
  pub fn new(source_dir: impl Into<PathBuf>, target_dir: impl Into<PathBuf>) -> Self {
    Self {
      cargo: std::env::var_os("CARGO").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("cargo")),
      source_dir: source_dir.into(),
      target_dir: target_dir.into(),
    }
  }

  /// Sources from `explicit`, else `RELOPACK_LAUNCHER_SRC`, else the launcher
  /// crate next to this one in the source tree.
  pub fn locate(explicit: Option<&Path>) -> Result<Self, CompileError> {
    let source_dir = explicit
      .map(Path::to_path_buf)
      .or_else(|| std::env::var_os(LAUNCHER_SRC_ENV).map(PathBuf::from))
      .unwrap_or_else(|| Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("launcher"));

    if !source_dir.join("Cargo.toml").is_file() {
      return Err(CompileError::SourceNotFound(source_dir));
    }
    let source_dir = dunce::canonicalize(&source_dir).unwrap_or(source_dir);
    Ok(Self::new(source_dir, launcher_target_dir()))
  }

  fn built_binary(&self, os: Os) -> PathBuf {
    self.target_dir.join("release").join(os.exe_file_name(LAUNCHER_BIN))
  }

  fn command(&self, spec: &LauncherSpec) -> Command {
    let mut cmd = Command::new(&self.cargo);
    cmd
      .arg("build")
      .arg("--release")
      .arg("--manifest-path")
      .arg(self.source_dir.join("Cargo.toml"))
      .arg("--target-dir")
      .arg(&self.target_dir)
      .env(PROGRAM_LIBNAME_ENV, &spec.program_library)
      .env(ENTRY_SYMBOL_ENV, &spec.entry)
      .env(RUNTIME_LIBNAME_ENV, &spec.runtime_library)
      // Value is 315532800 = January 1, 1980 00:00:00 UTC (ZIP epoch)
      .env("SOURCE_DATE_EPOCH", "315532800");
    if let Some(flags) = rpath_flags(spec.os) {
      cmd.env("RUSTFLAGS", flags);
    }
    cmd
  }
}

/// Linker flags giving the launcher a run path of `../lib` relative to itself.
///
/// Windows needs none: libraries sit next to the executable.
pub fn rpath_flags(os: Os) -> Option<String> {
  match os {
    Os::Linux => Some(format!("-C link-arg=-Wl,-rpath,$ORIGIN/../{}", LIB_DIR)),
    Os::MacOs => Some(format!("-C link-arg=-Wl,-rpath,@executable_path/../{}", LIB_DIR)),
    Os::Windows => None,
  }
}

impl LauncherCompiler for CargoLauncherCompiler {
  fn compile(&self, spec: &LauncherSpec, output: &Path) -> Result<(), CompileError> {
    info!(executable = %spec.executable, entry = %spec.entry, "compiling launcher");
    let mut cmd = self.command(spec);
    debug!(command = ?cmd, "cargo invocation");

    let result = cmd.output().map_err(|source| CompileError::Spawn {
      program: self.cargo.clone(),
      source,
    })?;
    if !result.status.success() {
      return Err(CompileError::Failed {
        code: result.status.code(),
        diagnostic: String::from_utf8_lossy(&result.stderr).trim().to_string(),
      });
    }

    let built = self.built_binary(spec.os);
    if !built.is_file() {
      return Err(CompileError::MissingOutput(built));
    }
    std::fs::copy(&built, output).map_err(|source| CompileError::Copy {
      path: output.to_path_buf(),
      source,
    })?;
    Ok(())
  }
}
