//! Lockfile-backed package manager.
//!
//! The package manager writes the fully resolved graph to `relopack.lock` next
//! to the project manifest. Relative artifact paths in the lockfile are
//! relative to the lockfile's directory; relative artifact paths in the project
//! manifest are relative to the project root.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use super::{ArtifactDecl, DependencyGraph, GraphError, Package, PackageManager};
use crate::consts::LOCK_FILE;
use crate::project::Project;

#[derive(Debug, Default, Deserialize)]
struct Lockfile {
  #[serde(default)]
  packages: Vec<Package>,
}

/// Reads the resolved graph from the project's lockfile.
#[derive(Debug, Default, Clone, Copy)]
pub struct LockfilePackageManager;

impl LockfilePackageManager {
  fn read_lockfile(project: &Project) -> Result<Lockfile, GraphError> {
    let path = project.root.join(LOCK_FILE);
    let content = match std::fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        debug!(path = %path.display(), "no lockfile, graph holds only the project");
        return Ok(Lockfile::default());
      }
      Err(source) => return Err(GraphError::Read { path, source }),
    };
    toml::from_str(&content).map_err(|source| GraphError::Parse { path, source })
  }
}

fn absolutize(artifacts: &mut [ArtifactDecl], base: &Path) {
  for entry in artifacts.iter_mut().flat_map(|a| a.entries.iter_mut()) {
    if entry.path.is_relative() {
      entry.path = base.join(&entry.path);
    }
  }
}

impl PackageManager for LockfilePackageManager {
  fn resolve_dependencies(&self, project: &Project) -> Result<DependencyGraph, GraphError> {
    let mut lock = Self::read_lockfile(project)?;
    for package in &mut lock.packages {
      absolutize(&mut package.artifacts, &project.root);
    }

    let mut root = Package {
      name: project.name().to_string(),
      version: None,
      stdlib: false,
      requires: project.manifest.dependencies.clone(),
      artifacts: project.manifest.artifacts.clone(),
    };
    absolutize(&mut root.artifacts, &project.root);

    let graph = DependencyGraph::new(root, lock.packages)?;
    debug!(packages = graph.package_count(), "resolved dependency graph");
    Ok(graph)
  }
}
