//! Bundle layout.
//!
//! ```text
//! <bundle>/
//! ├── bin/                     # launchers (and every library on Windows)
//! ├── lib/
//! │   ├── lib<name>.so         # program library carrying the snapshot
//! │   └── lib*.so              # collected artifacts + runtime libraries
//! ├── include/                 # public headers, library bundles only
//! └── depot/
//!     ├── bundle.json          # BundleManifest
//!     ├── artifacts.toml       # artifact name -> ${BUNDLE_ROOT}/... path
//!     └── artifacts/<name>/    # artifacts that are not dynamic libraries
//! ```
//!
//! The launcher finds the bundle root by walking [`SNAPSHOT_DEPTH`] components
//! up from the program library, so the depth of the library directory below
//! the root is fixed here and nowhere else.

mod assemble;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use assemble::{AssembledBundle, Assembler};

use crate::platform::{Os, Platform};
use crate::relocate::{PathRewrite, RelocateError};
use crate::snapshot::{ModuleFilter, SnapshotMode};
use crate::util::hash::{ContentHash, HashError};

pub const BIN_DIR: &str = "bin";
pub const LIB_DIR: &str = "lib";
pub const INCLUDE_DIR: &str = "include";
pub const DEPOT_DIR: &str = "depot";
/// Under [`DEPOT_DIR`].
pub const ARTIFACT_DIR: &str = "artifacts";
pub const MANIFEST_FILE: &str = "bundle.json";
pub const ARTIFACTS_FILE: &str = "artifacts.toml";

/// Directory levels between the bundle root and files in the library directory.
pub const LIBRARY_DIR_DEPTH: usize = 1;

/// Path components above the program library that lead to the bundle root:
/// the library directory plus the file itself.
pub const SNAPSHOT_DEPTH: usize = LIBRARY_DIR_DEPTH + 1;

pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum LayoutError {
  #[error("output {0} already exists and is not empty (use --force to replace it)")]
  OutputExists(PathBuf),

  #[error("two different libraries are named {file_name}: {first} and {second}")]
  Conflict {
    file_name: String,
    first: PathBuf,
    second: PathBuf,
  },

  #[error("two different headers are named {file_name}: {first} and {second}")]
  HeaderConflict {
    file_name: String,
    first: PathBuf,
    second: PathBuf,
  },

  #[error("{0} has no file name")]
  NoFileName(PathBuf),

  #[error("io error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to read bundle manifest {path}: {source}")]
  Manifest {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to write artifact index: {0}")]
  ArtifactIndex(#[from] toml::ser::Error),

  #[error(transparent)]
  Relocate(#[from] RelocateError),

  #[error(transparent)]
  Hash(#[from] HashError),
}

impl LayoutError {
  pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
    move |source| Self::Io {
      path: path.to_path_buf(),
      source,
    }
  }
}

/// Directory holding dynamic libraries, relative to the bundle root.
///
/// Windows resolves DLLs next to the executable, so libraries live in `bin/`.
pub fn library_dir(os: Os) -> &'static str {
  match os {
    Os::Windows => BIN_DIR,
    _ => LIB_DIR,
  }
}

/// The bundle root of a program library at its resolved path.
pub fn bundle_root_from_snapshot(snapshot: &Path) -> Option<&Path> {
  snapshot.ancestors().nth(SNAPSHOT_DEPTH)
}

pub fn depot_dir(root: &Path) -> PathBuf {
  root.join(DEPOT_DIR)
}

/// File names of the program library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryNames {
  /// The real file.
  pub file_name: String,
  /// Symlinks to `file_name`, most specific first. The last one is the
  /// unversioned name the launcher loads.
  pub links: Vec<String>,
}

impl LibraryNames {
  pub fn new(name: &str, version: Option<&str>, os: Os) -> Self {
    let plain = os.dylib_file_name(name);
    let Some(version) = version else {
      return Self {
        file_name: plain,
        links: Vec::new(),
      };
    };
    let major = version.split('.').next().unwrap_or(version);

    match os {
      Os::Linux => Self {
        file_name: format!("{}.{}", plain, version),
        links: dedup_links([format!("{}.{}", plain, major), plain], version == major),
      },
      Os::MacOs => Self {
        file_name: format!("lib{}.{}.dylib", name, version),
        links: dedup_links([format!("lib{}.{}.dylib", name, major), plain], version == major),
      },
      Os::Windows => Self {
        file_name: plain,
        links: Vec::new(),
      },
    }
  }

  /// The name a loader is asked for.
  pub fn load_name(&self) -> &str {
    self.links.last().unwrap_or(&self.file_name)
  }
}

fn dedup_links(links: [String; 2], major_only: bool) -> Vec<String> {
  let [major, plain] = links;
  if major_only { vec![plain] } else { vec![major, plain] }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleKind {
  App,
  Library,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
  /// Program library carrying the snapshot, relative to the bundle root.
  pub file: PathBuf,
  pub mode: SnapshotMode,
  pub hash: ContentHash,
  pub parent: Option<ContentHash>,
  pub module_filter: ModuleFilter,
}

/// What the caller knows about a bundle before assembly.
#[derive(Debug, Clone)]
pub struct BundleDescription {
  pub kind: BundleKind,
  pub name: String,
  pub platform: Platform,
  pub snapshot: SnapshotInfo,
}

/// `depot/bundle.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
  pub version: u32,
  pub kind: BundleKind,
  pub name: String,
  pub platform: Platform,
  pub snapshot: SnapshotInfo,
  pub executables: Vec<String>,
  pub libraries: Vec<String>,
  pub headers: Vec<String>,
  /// Build-machine directories whose paths must not appear in the bundle.
  pub build_prefixes: Vec<PathBuf>,
  pub rewrites: Vec<PathRewrite>,
}

impl BundleManifest {
  /// Manifest location relative to the bundle root.
  pub fn relative_path() -> PathBuf {
    Path::new(DEPOT_DIR).join(MANIFEST_FILE)
  }

  pub fn read(root: &Path) -> Result<Self, LayoutError> {
    let path = root.join(Self::relative_path());
    let content = fs::read_to_string(&path).map_err(LayoutError::io(&path))?;
    serde_json::from_str(&content).map_err(|source| LayoutError::Manifest { path, source })
  }

  pub fn write(&self, root: &Path) -> Result<(), LayoutError> {
    let path = root.join(Self::relative_path());
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).map_err(LayoutError::io(parent))?;
    }
    let content = serde_json::to_string_pretty(self).map_err(|source| LayoutError::Manifest {
      path: path.clone(),
      source,
    })?;
    fs::write(&path, content).map_err(LayoutError::io(&path))
  }
}
