//! The language runtime installation a bundle is built against.
//!
//! ```text
//! <runtime>/
//! ├── bin/relopack-compile      # snapshot compiler (toolchain)
//! └── lib/
//!     ├── base.img              # the runtime's own snapshot
//!     └── lib*.so               # shared libraries copied into every bundle
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::consts::TOOLCHAIN_ENV;
use crate::platform::Os;
use crate::platform::paths::runtime_dir;

/// File name of the runtime's own snapshot inside its library directory.
pub const BASE_IMAGE_FILE: &str = "base.img";

/// Compiler binary inside the runtime's `bin` directory.
pub const COMPILER_BIN: &str = "relopack-compile";

#[derive(Debug, Error)]
pub enum RuntimeError {
  #[error("no runtime installation configured (pass --runtime or set RELOPACK_RUNTIME_DIR)")]
  NotConfigured,

  #[error("runtime installation {path} has no {what}")]
  Incomplete { path: PathBuf, what: &'static str },

  #[error("failed to list {path}: {source}")]
  ReadDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

#[derive(Debug, Clone)]
pub struct RuntimeInstall {
  pub root: PathBuf,
  pub lib_dir: PathBuf,
  pub base_image: PathBuf,
  pub compiler: PathBuf,
}

impl RuntimeInstall {
  /// Describe the installation rooted at `root`.
  ///
  /// `RELOPACK_TOOLCHAIN` replaces the bundled compiler when set.
  pub fn discover(root: &Path) -> Result<Self, RuntimeError> {
    let root = dunce::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let lib_dir = root.join("lib");
    if !lib_dir.is_dir() {
      return Err(RuntimeError::Incomplete {
        path: root,
        what: "lib directory",
      });
    }

    let compiler = match std::env::var_os(TOOLCHAIN_ENV) {
      Some(path) => PathBuf::from(path),
      None => root.join("bin").join(host_exe_name(COMPILER_BIN)),
    };

    debug!(root = %root.display(), compiler = %compiler.display(), "using runtime installation");
    Ok(Self {
      base_image: lib_dir.join(BASE_IMAGE_FILE),
      lib_dir,
      compiler,
      root,
    })
  }

  /// Use `explicit` if given, else `RELOPACK_RUNTIME_DIR`.
  pub fn locate(explicit: Option<&Path>) -> Result<Self, RuntimeError> {
    match explicit.map(Path::to_path_buf).or_else(runtime_dir) {
      Some(root) => Self::discover(&root),
      None => Err(RuntimeError::NotConfigured),
    }
  }

  /// Shared libraries of the runtime itself, sorted by file name.
  pub fn shared_libraries(&self, os: Os) -> Result<Vec<PathBuf>, RuntimeError> {
    let entries = std::fs::read_dir(&self.lib_dir).map_err(|source| RuntimeError::ReadDir {
      path: self.lib_dir.clone(),
      source,
    })?;

    let mut libs: Vec<PathBuf> = entries
      .filter_map(|e| e.ok())
      .map(|e| e.path())
      .filter(|p| p.is_file())
      .filter(|p| p.file_name().and_then(|n| n.to_str()).is_some_and(|n| os.is_dylib(n)))
      .collect();
    libs.sort();
    Ok(libs)
  }
}

fn host_exe_name(name: &str) -> String {
  if cfg!(windows) {
    format!("{}.exe", name)
  } else {
    name.to_string()
  }
}
