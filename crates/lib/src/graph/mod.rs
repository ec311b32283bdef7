//! Resolved dependency graph.
//!
//! Nodes are packages (standard-library modules included), edges point from a
//! package to the packages it requires. The graph is resolved once per build by
//! the package manager and is read-only afterwards.

mod lockfile;

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::platform::Platform;
use crate::project::Project;

pub use lockfile::LockfilePackageManager;

#[derive(Debug, Error)]
pub enum GraphError {
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

  #[error("package '{package}' required by '{required_by}' is not in the resolved graph")]
  MissingPackage { package: String, required_by: String },

  #[error("package '{0}' appears more than once in the resolved graph")]
  DuplicatePackage(String),
}

/// One platform-specific build of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
  pub platform: Platform,
  pub path: PathBuf,
}

/// A named native binary or library a package depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDecl {
  pub name: String,
  /// Lazy artifacts are fetched on first use and only bundled on request.
  #[serde(default)]
  pub lazy: bool,
  pub entries: Vec<ArtifactEntry>,
}

impl ArtifactDecl {
  /// The entry built for `platform`, if the package ships one.
  pub fn resolve(&self, platform: Platform) -> Option<&ArtifactEntry> {
    self.entries.iter().find(|e| e.platform == platform)
  }

  /// Platforms this artifact is available for.
  pub fn platforms(&self) -> BTreeSet<Platform> {
    self.entries.iter().map(|e| e.platform).collect()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
  pub name: String,
  pub version: Option<String>,
  /// Standard-library module shipped with the runtime.
  #[serde(default)]
  pub stdlib: bool,
  #[serde(default)]
  pub requires: Vec<String>,
  #[serde(default)]
  pub artifacts: Vec<ArtifactDecl>,
}

/// The package manager collaborator.
pub trait PackageManager {
  fn resolve_dependencies(&self, project: &Project) -> Result<DependencyGraph, GraphError>;
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
  graph: DiGraph<Package, ()>,
  root: NodeIndex,
}

impl DependencyGraph {
  /// Build the graph from the root package and every package it may reach.
  ///
  /// Every `requires` entry must name a package in the set.
  pub fn new(root: Package, packages: Vec<Package>) -> Result<Self, GraphError> {
    let mut graph = DiGraph::new();
    let mut nodes: HashMap<String, NodeIndex> = HashMap::new();

    for package in std::iter::once(root).chain(packages) {
      if nodes.contains_key(&package.name) {
        return Err(GraphError::DuplicatePackage(package.name));
      }
      let name = package.name.clone();
      let idx = graph.add_node(package);
      nodes.insert(name, idx);
    }

    let edges: Vec<(NodeIndex, NodeIndex)> = graph
      .node_indices()
      .map(|idx| {
        let package = &graph[idx];
        package
          .requires
          .iter()
          .map(|dep| {
            nodes
              .get(dep)
              .map(|&dep_idx| (idx, dep_idx))
              .ok_or_else(|| GraphError::MissingPackage {
                package: dep.clone(),
                required_by: package.name.clone(),
              })
          })
          .collect::<Result<Vec<_>, _>>()
      })
      .collect::<Result<Vec<_>, _>>()?
      .into_iter()
      .flatten()
      .collect();

    for (from, to) in edges {
      graph.add_edge(from, to, ());
    }

    Ok(Self {
      graph,
      root: NodeIndex::new(0),
    })
  }

  pub fn root(&self) -> &Package {
    &self.graph[self.root]
  }

  /// Packages the root requires directly, the root itself first.
  pub fn direct(&self) -> Vec<&Package> {
    let mut out = vec![self.root()];
    let mut deps: Vec<&Package> = self.graph.neighbors(self.root).map(|idx| &self.graph[idx]).collect();
    deps.sort_by(|a, b| a.name.cmp(&b.name));
    deps.dedup_by(|a, b| a.name == b.name);
    out.extend(deps);
    out
  }

  /// Every package reachable from the root, the root first, then by name.
  ///
  /// Requirement cycles are tolerated; each package is visited once.
  pub fn reachable(&self) -> Vec<&Package> {
    let mut bfs = Bfs::new(&self.graph, self.root);
    let mut rest = Vec::new();
    while let Some(idx) = bfs.next(&self.graph) {
      if idx != self.root {
        rest.push(&self.graph[idx]);
      }
    }
    rest.sort_by(|a, b| a.name.cmp(&b.name));

    let mut out = vec![self.root()];
    out.extend(rest);
    out
  }

  /// Names of reachable standard-library modules, sorted.
  pub fn stdlib_modules(&self) -> Vec<String> {
    self
      .reachable()
      .into_iter()
      .filter(|p| p.stdlib)
      .map(|p| p.name.clone())
      .collect()
  }

  pub fn package_count(&self) -> usize {
    self.graph.node_count()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn pkg(name: &str, requires: &[&str]) -> Package {
    Package {
      name: name.to_string(),
      version: None,
      stdlib: false,
      requires: requires.iter().map(|s| s.to_string()).collect(),
      artifacts: Vec::new(),
    }
  }

  fn names(packages: Vec<&Package>) -> Vec<&str> {
    packages.into_iter().map(|p| p.name.as_str()).collect()
  }

  #[test]
  fn reachable_includes_transitive_dependencies() {
    let graph = DependencyGraph::new(
      pkg("app", &["B"]),
      vec![pkg("B", &["C"]), pkg("C", &[]), pkg("Unused", &[])],
    )
    .unwrap();

    assert_eq!(names(graph.reachable()), vec!["app", "B", "C"]);
    assert_eq!(names(graph.direct()), vec!["app", "B"]);
    assert_eq!(graph.package_count(), 4);
  }

  #[test]
  fn cycles_are_visited_once() {
    let graph = DependencyGraph::new(pkg("app", &["A"]), vec![pkg("A", &["B"]), pkg("B", &["A"])]).unwrap();
    assert_eq!(names(graph.reachable()), vec!["app", "A", "B"]);
  }

  #[test]
  fn missing_requirement_is_an_error() {
    let err = DependencyGraph::new(pkg("app", &["Ghost"]), vec![]).unwrap_err();
    assert!(matches!(
      err,
      GraphError::MissingPackage { ref package, ref required_by } if package == "Ghost" && required_by == "app"
    ));
  }

  #[test]
  fn duplicate_package_is_an_error() {
    let err = DependencyGraph::new(pkg("app", &[]), vec![pkg("A", &[]), pkg("A", &[])]).unwrap_err();
    assert!(matches!(err, GraphError::DuplicatePackage(name) if name == "A"));
  }

  #[test]
  fn stdlib_modules_are_reported() {
    let mut core = pkg("Core", &[]);
    core.stdlib = true;
    let mut text = pkg("Text", &[]);
    text.stdlib = true;
    let graph = DependencyGraph::new(pkg("app", &["Text", "Core"]), vec![core, text]).unwrap();
    assert_eq!(graph.stdlib_modules(), vec!["Core".to_string(), "Text".to_string()]);
  }

  #[test]
  fn artifact_resolves_by_platform() {
    let linux: Platform = "x86_64-linux".parse().unwrap();
    let mac: Platform = "aarch64-darwin".parse().unwrap();
    let decl = ArtifactDecl {
      name: "zlib".to_string(),
      lazy: false,
      entries: vec![ArtifactEntry {
        platform: linux,
        path: PathBuf::from("/opt/libz.so"),
      }],
    };

    assert_eq!(decl.resolve(linux).unwrap().path, PathBuf::from("/opt/libz.so"));
    assert!(decl.resolve(mac).is_none());
  }
}
