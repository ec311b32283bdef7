//! Project manifest loading.
//!
//! A project is a directory holding `relopack.toml`:
//!
//! ```toml
//! name = "hello"
//! entry_script = "src/hello.src"
//! dependencies = ["Json"]
//! precompile_scripts = ["precompile/warmup.src"]
//!
//! [[executables]]
//! name = "hello"
//! entry = "main"
//!
//! [library]
//! name = "hello"
//! version = "1.2.0"
//! headers = ["include/hello.h"]
//!
//! [snapshot]
//! incremental = false
//! filter_stdlibs = true
//! modules = ["Core", "Text"]
//!
//! [[artifacts]]
//! name = "zlib"
//! entries = [{ platform = "x86_64-linux", path = "/opt/zlib/lib/libz.so.1" }]
//! ```
//!
//! The manifest is immutable input to a build; nothing here writes it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::PROJECT_FILE;
use crate::graph::ArtifactDecl;

/// Entry symbol used when an executable does not name one.
pub const DEFAULT_ENTRY_SYMBOL: &str = "main";

#[derive(Debug, Error)]
pub enum ProjectError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("invalid project manifest: {0}")]
  Invalid(String),
}

/// One launcher to produce for an app bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutableDecl {
  /// File name of the launcher in `bin/` (without platform extension).
  pub name: String,
  /// Exported symbol of the program library the launcher calls.
  #[serde(default = "default_entry")]
  pub entry: String,
}

fn default_entry() -> String {
  DEFAULT_ENTRY_SYMBOL.to_string()
}

/// Library-mode settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryDecl {
  /// Library name; defaults to the project name.
  pub name: Option<String>,
  /// Optional `major.minor.patch` version embedded in the file name.
  pub version: Option<String>,
  /// Public headers, relative to the project root.
  #[serde(default)]
  pub headers: Vec<PathBuf>,
}

/// Snapshot defaults; CLI flags override them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSettings {
  #[serde(default)]
  pub incremental: bool,
  #[serde(default)]
  pub filter_stdlibs: bool,
  /// Standard modules kept when `filter_stdlibs` is set.
  #[serde(default)]
  pub modules: Vec<String>,
  pub cpu_target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectManifest {
  pub name: String,
  pub entry_script: Option<PathBuf>,
  #[serde(default)]
  pub dependencies: Vec<String>,
  #[serde(default)]
  pub precompile_scripts: Vec<PathBuf>,
  #[serde(default)]
  pub executables: Vec<ExecutableDecl>,
  pub library: Option<LibraryDecl>,
  #[serde(default)]
  pub snapshot: SnapshotSettings,
  #[serde(default)]
  pub artifacts: Vec<ArtifactDecl>,
}

/// A loaded project: its root directory plus the parsed manifest.
#[derive(Debug, Clone)]
pub struct Project {
  pub root: PathBuf,
  pub manifest: ProjectManifest,
}

impl Project {
  /// Load `relopack.toml` from `root`.
  pub fn load(root: &Path) -> Result<Self, ProjectError> {
    let path = root.join(PROJECT_FILE);
    let content = std::fs::read_to_string(&path).map_err(|source| ProjectError::Read {
      path: path.clone(),
      source,
    })?;
    let manifest: ProjectManifest =
      toml::from_str(&content).map_err(|source| ProjectError::Parse { path, source })?;

    let root = dunce::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let project = Self { root, manifest };
    project.validate()?;
    Ok(project)
  }

  pub fn name(&self) -> &str {
    &self.manifest.name
  }

  /// Executables to build; a single one named after the project when none are declared.
  pub fn executables(&self) -> Vec<ExecutableDecl> {
    if self.manifest.executables.is_empty() {
      return vec![ExecutableDecl {
        name: self.manifest.name.clone(),
        entry: default_entry(),
      }];
    }
    self.manifest.executables.clone()
  }

  /// Library name for library bundles.
  pub fn library_name(&self) -> &str {
    self
      .manifest
      .library
      .as_ref()
      .and_then(|l| l.name.as_deref())
      .unwrap_or(&self.manifest.name)
  }

  /// Absolute path of a project-relative path.
  pub fn resolve(&self, relative: &Path) -> PathBuf {
    if relative.is_absolute() {
      relative.to_path_buf()
    } else {
      self.root.join(relative)
    }
  }

  /// Scripts the toolchain runs while building the snapshot: the entry script
  /// first, then the precompile scripts in declaration order.
  pub fn entry_scripts(&self) -> Vec<PathBuf> {
    self
      .manifest
      .entry_script
      .iter()
      .chain(self.manifest.precompile_scripts.iter())
      .map(|p| self.resolve(p))
      .collect()
  }

  fn validate(&self) -> Result<(), ProjectError> {
    let m = &self.manifest;
    if !is_file_name(&m.name) {
      return Err(ProjectError::Invalid(format!("'{}' is not a valid project name", m.name)));
    }

    let mut seen = HashSet::new();
    for exe in &m.executables {
      if !is_file_name(&exe.name) {
        return Err(ProjectError::Invalid(format!(
          "'{}' is not a valid executable name",
          exe.name
        )));
      }
      if !seen.insert(exe.name.as_str()) {
        return Err(ProjectError::Invalid(format!("executable '{}' declared twice", exe.name)));
      }
      if !is_symbol(&exe.entry) {
        return Err(ProjectError::Invalid(format!(
          "entry '{}' of executable '{}' is not a C symbol name",
          exe.entry, exe.name
        )));
      }
    }

    if let Some(lib) = &m.library {
      if let Some(name) = &lib.name
        && !is_file_name(name)
      {
        return Err(ProjectError::Invalid(format!("'{}' is not a valid library name", name)));
      }
      if let Some(version) = &lib.version
        && !is_version(version)
      {
        return Err(ProjectError::Invalid(format!(
          "library version '{}' must look like 1, 1.2 or 1.2.3",
          version
        )));
      }
    }

    Ok(())
  }
}

/// A name usable as a single path component.
pub(crate) fn is_file_name(name: &str) -> bool {
  !name.is_empty()
    && name != "."
    && name != ".."
    && name
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// A C identifier, as the dynamic loader looks it up.
pub(crate) fn is_symbol(name: &str) -> bool {
  let mut chars = name.chars();
  matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_version(version: &str) -> bool {
  let parts: Vec<&str> = version.split('.').collect();
  parts.len() <= 3 && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}
