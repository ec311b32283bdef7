use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache_lock::CacheLockError;
use crate::platform::Platform;
use crate::util::hash::{ContentHash, HashError, Hashable};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotMode {
  Incremental,
  #[default]
  Full,
}

impl SnapshotMode {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Incremental => "incremental",
      Self::Full => "full",
    }
  }
}

impl fmt::Display for SnapshotMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Which standard modules a full snapshot contains.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "modules")]
pub enum ModuleFilter {
  #[default]
  All,
  Only(BTreeSet<String>),
}

impl ModuleFilter {
  pub fn only<I, S>(modules: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self::Only(modules.into_iter().map(Into::into).collect())
  }

  pub fn is_filtered(&self) -> bool {
    matches!(self, Self::Only(_))
  }

  pub fn includes(&self, module: &str) -> bool {
    match self {
      Self::All => true,
      Self::Only(set) => set.contains(module),
    }
  }
}

/// Everything the toolchain needs to produce one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRequest {
  pub project_root: PathBuf,
  /// Entry script first, then precompile scripts.
  pub entry_scripts: Vec<PathBuf>,
  pub mode: SnapshotMode,
  pub module_filter: ModuleFilter,
  pub cpu_target: Option<String>,
  pub platform: Platform,
}

impl Hashable for SnapshotRequest {}

impl SnapshotRequest {
  /// Reject option combinations the toolchain cannot honour.
  pub fn validate(&self) -> Result<(), SnapshotError> {
    if self.mode == SnapshotMode::Incremental && self.module_filter.is_filtered() {
      return Err(SnapshotError::FilterRequiresFull);
    }
    if let Some(host) = Platform::current()
      && host != self.platform
    {
      return Err(SnapshotError::CrossPlatform {
        host,
        target: self.platform,
      });
    }
    Ok(())
  }
}

/// A built snapshot file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
  pub path: PathBuf,
  pub mode: SnapshotMode,
  pub hash: ContentHash,
  /// Identity of the image an incremental snapshot is layered on.
  pub parent: Option<ContentHash>,
  pub module_filter: ModuleFilter,
  /// Whether the file came out of the snapshot cache.
  #[serde(skip)]
  pub cached: bool,
}

#[derive(Debug, Error)]
pub enum SnapshotError {
  #[error("snapshot compilation failed (exit code {code:?}):\n{diagnostic}")]
  Build { diagnostic: String, code: Option<i32> },

  #[error("snapshot compiler exited successfully but wrote no snapshot")]
  Empty,

  #[error("standard modules can only be filtered from a full (non-incremental) snapshot")]
  FilterRequiresFull,

  #[error("cannot build a {target} snapshot on a {host} host")]
  CrossPlatform { host: Platform, target: Platform },

  #[error("incremental snapshots need the runtime's base image, which was not found")]
  MissingBaseImage,

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Hash(#[from] HashError),

  #[error(transparent)]
  Lock(#[from] CacheLockError),

  #[error("failed to serialize snapshot metadata: {0}")]
  Serialize(#[from] serde_json::Error),
}
