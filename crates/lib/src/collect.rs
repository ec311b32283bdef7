//! Artifact collection.
//!
//! Walks the resolved dependency graph and enumerates every native artifact
//! that has to ship with the bundle. Collection is a pure computation over the
//! graph: nothing here touches the filesystem.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace};

use crate::graph::DependencyGraph;
use crate::platform::Platform;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectError {
  #[error("artifact '{artifact}' of package '{package}' has no entry for {platform} (available: {available})")]
  UnresolvedArtifact {
    artifact: String,
    package: String,
    platform: Platform,
    available: String,
  },
}

#[derive(Debug, Clone, Copy)]
pub struct CollectOptions {
  pub platform: Platform,
  /// Bundle artifacts marked lazy as well.
  pub include_lazy: bool,
  /// Follow requirements past the root's direct dependencies.
  pub include_transitive: bool,
}

impl CollectOptions {
  pub fn new(platform: Platform) -> Self {
    Self {
      platform,
      include_lazy: false,
      include_transitive: true,
    }
  }
}

/// One artifact selected for the bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectedArtifact {
  /// Artifact name as first declared.
  pub name: String,
  /// Absolute source path on the build machine.
  pub source: PathBuf,
  pub platform: Platform,
  /// Packages declaring this artifact, sorted.
  pub declared_by: Vec<String>,
}

/// Collected artifacts keyed by normalized source path, so no two entries share one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSet {
  by_source: BTreeMap<PathBuf, CollectedArtifact>,
}

impl ArtifactSet {
  pub fn len(&self) -> usize {
    self.by_source.len()
  }

  pub fn is_empty(&self) -> bool {
    self.by_source.is_empty()
  }

  /// Artifacts ordered by source path.
  pub fn iter(&self) -> impl Iterator<Item = &CollectedArtifact> {
    self.by_source.values()
  }

  pub fn contains_source(&self, path: &Path) -> bool {
    self.by_source.contains_key(&normalize(path))
  }

  fn insert(&mut self, name: &str, source: &Path, platform: Platform, package: &str) {
    let key = normalize(source);
    let entry = self.by_source.entry(key.clone()).or_insert_with(|| CollectedArtifact {
      name: name.to_string(),
      source: key,
      platform,
      declared_by: Vec::new(),
    });
    if let Err(pos) = entry.declared_by.binary_search_by(|p| p.as_str().cmp(package)) {
      entry.declared_by.insert(pos, package.to_string());
    }
  }
}

/// Enumerate the artifacts `graph` needs on `options.platform`.
///
/// Fails on the first artifact without an entry for the target platform.
pub fn collect_artifacts(graph: &DependencyGraph, options: &CollectOptions) -> Result<ArtifactSet, CollectError> {
  let packages = if options.include_transitive {
    graph.reachable()
  } else {
    graph.direct()
  };

  let mut set = ArtifactSet::default();
  for package in packages {
    for decl in &package.artifacts {
      if decl.lazy && !options.include_lazy {
        trace!(artifact = %decl.name, package = %package.name, "skipping lazy artifact");
        continue;
      }

      let entry = decl
        .resolve(options.platform)
        .ok_or_else(|| CollectError::UnresolvedArtifact {
          artifact: decl.name.clone(),
          package: package.name.clone(),
          platform: options.platform,
          available: available_list(decl.platforms().into_iter()),
        })?;

      set.insert(&decl.name, &entry.path, entry.platform, &package.name);
    }
  }

  debug!(count = set.len(), platform = %options.platform, "collected artifacts");
  Ok(set)
}

fn available_list(platforms: impl Iterator<Item = Platform>) -> String {
  let list: Vec<String> = platforms.map(|p| p.triple()).collect();
  if list.is_empty() {
    "none".to_string()
  } else {
    list.join(", ")
  }
}

/// Lexically normalize a path: drop `.` components and fold `..` into its parent.
pub(crate) fn normalize(path: &Path) -> PathBuf {
  let mut out = PathBuf::new();
  for component in path.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        if !out.pop() {
          out.push(component);
        }
      }
      other => out.push(other),
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::graph::{ArtifactDecl, ArtifactEntry, Package};
  use proptest::prelude::*;

  fn linux() -> Platform {
    "x86_64-linux".parse().unwrap()
  }

  fn mac() -> Platform {
    "aarch64-darwin".parse().unwrap()
  }

  fn artifact(name: &str, platform: Platform, path: &str) -> ArtifactDecl {
    ArtifactDecl {
      name: name.to_string(),
      lazy: false,
      entries: vec![ArtifactEntry {
        platform,
        path: PathBuf::from(path),
      }],
    }
  }

  fn package(name: &str, requires: &[&str], artifacts: Vec<ArtifactDecl>) -> Package {
    Package {
      name: name.to_string(),
      version: None,
      stdlib: false,
      requires: requires.iter().map(|s| s.to_string()).collect(),
      artifacts,
    }
  }

  #[test]
  fn collects_transitive_artifacts() {
    let graph = DependencyGraph::new(
      package("app", &["A"], vec![]),
      vec![
        package("A", &["B"], vec![artifact("a", linux(), "/deps/liba.so")]),
        package("B", &[], vec![artifact("b", linux(), "/deps/libb.so")]),
      ],
    )
    .unwrap();

    let set = collect_artifacts(&graph, &CollectOptions::new(linux())).unwrap();
    let names: Vec<&str> = set.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);
  }

  #[test]
  fn direct_only_skips_transitive_artifacts() {
    let graph = DependencyGraph::new(
      package("app", &["A"], vec![]),
      vec![
        package("A", &["B"], vec![artifact("a", linux(), "/deps/liba.so")]),
        package("B", &[], vec![artifact("b", linux(), "/deps/libb.so")]),
      ],
    )
    .unwrap();

    let mut options = CollectOptions::new(linux());
    options.include_transitive = false;
    let set = collect_artifacts(&graph, &options).unwrap();
    assert_eq!(set.len(), 1);
    assert!(set.contains_source(Path::new("/deps/liba.so")));
  }

  #[test]
  fn shared_artifact_is_collected_once() {
    let graph = DependencyGraph::new(
      package("app", &["A", "B"], vec![]),
      vec![
        package("A", &[], vec![artifact("zlib", linux(), "/deps/zlib/libz.so")]),
        package("B", &[], vec![artifact("Zlib_jll", linux(), "/deps/zlib/./libz.so")]),
      ],
    )
    .unwrap();

    let set = collect_artifacts(&graph, &CollectOptions::new(linux())).unwrap();
    assert_eq!(set.len(), 1);
    let only = set.iter().next().unwrap();
    assert_eq!(only.declared_by, vec!["A".to_string(), "B".to_string()]);
    assert_eq!(only.source, PathBuf::from("/deps/zlib/libz.so"));
  }

  #[test]
  fn missing_platform_entry_is_unresolved() {
    let graph = DependencyGraph::new(
      package("app", &[], vec![artifact("gpu", linux(), "/deps/libgpu.so")]),
      vec![],
    )
    .unwrap();

    let err = collect_artifacts(&graph, &CollectOptions::new(mac())).unwrap_err();
    assert_eq!(
      err,
      CollectError::UnresolvedArtifact {
        artifact: "gpu".to_string(),
        package: "app".to_string(),
        platform: mac(),
        available: "x86_64-linux".to_string(),
      }
    );
  }

  #[test]
  fn lazy_artifacts_are_opt_in() {
    let mut lazy = artifact("fonts", mac(), "/deps/fonts");
    lazy.lazy = true;
    let graph = DependencyGraph::new(package("app", &[], vec![lazy]), vec![]).unwrap();

    // Lazy and not requested: skipped even though the platform does not match.
    assert!(collect_artifacts(&graph, &CollectOptions::new(linux())).unwrap().is_empty());

    let mut options = CollectOptions::new(mac());
    options.include_lazy = true;
    assert_eq!(collect_artifacts(&graph, &options).unwrap().len(), 1);
  }

  #[test]
  fn normalize_folds_dot_segments() {
    assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
    assert_eq!(normalize(Path::new("a/../../b")), PathBuf::from("../b"));
  }

  proptest! {
    #[test]
    fn collected_sources_are_unique(
      picks in proptest::collection::vec((0usize..6, 0usize..4), 1..24)
    ) {
      // Packages declare artifacts drawn from a small pool of paths, some spelled
      // with redundant `.` segments, so collisions are frequent.
      let pool = ["/deps/liba.so", "/deps/./liba.so", "/deps/libb.so", "/deps/x/../libb.so"];
      let mut packages: Vec<Package> = (0..6).map(|i| package(&format!("P{}", i), &[], vec![])).collect();
      for (i, (pkg_idx, path_idx)) in picks.iter().enumerate() {
        packages[*pkg_idx]
          .artifacts
          .push(artifact(&format!("art{}", i), linux(), pool[*path_idx]));
      }
      let names: Vec<String> = packages.iter().map(|p| p.name.clone()).collect();
      let requires: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
      let graph = DependencyGraph::new(package("app", &requires, vec![]), packages).unwrap();

      let set = collect_artifacts(&graph, &CollectOptions::new(linux())).unwrap();
      let mut sources: Vec<&PathBuf> = set.iter().map(|a| &a.source).collect();
      let before = sources.len();
      sources.dedup();
      prop_assert_eq!(before, sources.len());
      prop_assert!(set.len() <= 2);
    }
  }
}
