//! User-facing bundle operations.
//!
//! Every operation runs one sequential pipeline:
//!
//! 1. resolve the dependency graph (package manager)
//! 2. collect artifacts ([`crate::collect`])
//! 3. build the snapshot ([`crate::snapshot`])
//! 4. stage libraries, artifacts and the program library ([`crate::layout`])
//! 5. compile launchers (app bundles only, [`crate::compile`])
//! 6. rewrite build paths and publish ([`crate::relocate`], [`crate::layout`])
//!
//! A failure at any step leaves no output behind and keeps whatever the output
//! path held before.

mod app;
mod audit;
mod library;

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;
use tracing::debug;

pub use app::{AppOptions, create_app};
pub use audit::{AuditReport, audit_bundle};
pub use library::{LibraryOptions, create_library};

use crate::collect::{ArtifactSet, CollectError, CollectOptions, collect_artifacts};
use crate::compile::{CompileError, LauncherCompiler};
use crate::graph::{DependencyGraph, GraphError, PackageManager};
use crate::layout::{
  AssembledBundle, Assembler, BundleDescription, BundleKind, LayoutError, LibraryNames, SnapshotInfo,
};
use crate::platform::{Platform, PlatformError};
use crate::project::{Project, ProjectError};
use crate::relocate::RelocateError;
use crate::runtime::{RuntimeError, RuntimeInstall};
use crate::snapshot::{
  ModuleFilter, Snapshot, SnapshotCache, SnapshotError, SnapshotMode, SnapshotRequest, Toolchain, build_snapshot,
};

#[derive(Debug, Error)]
pub enum BundleError {
  #[error(transparent)]
  Project(#[from] ProjectError),

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Collect(#[from] CollectError),

  #[error(transparent)]
  Snapshot(#[from] SnapshotError),

  #[error(transparent)]
  Layout(#[from] LayoutError),

  #[error(transparent)]
  Compile(#[from] CompileError),

  #[error(transparent)]
  Relocate(#[from] RelocateError),

  #[error(transparent)]
  Runtime(#[from] RuntimeError),

  #[error(transparent)]
  Platform(#[from] PlatformError),

  #[error("io error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// The collaborators a build talks to.
pub struct BuildContext<'a> {
  pub package_manager: &'a dyn PackageManager,
  pub toolchain: &'a dyn Toolchain,
  pub launcher_compiler: &'a dyn LauncherCompiler,
  /// Shared libraries of this installation are copied into every bundle.
  pub runtime: Option<&'a RuntimeInstall>,
  /// Reuse of incremental snapshots; `None` disables caching.
  pub cache: Option<&'a SnapshotCache>,
}

/// Snapshot choices shared by all operations. CLI flags and the project
/// manifest both end up here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotOptions {
  pub incremental: bool,
  pub filter_stdlibs: bool,
  /// Extra standard modules to keep when filtering.
  pub modules: Vec<String>,
  pub cpu_target: Option<String>,
  /// Precompile scripts in addition to the project's own.
  pub precompile_scripts: Vec<PathBuf>,
}

impl SnapshotOptions {
  /// Defaults from the project manifest.
  pub fn from_project(project: &Project) -> Self {
    let settings = &project.manifest.snapshot;
    Self {
      incremental: settings.incremental,
      filter_stdlibs: settings.filter_stdlibs,
      modules: settings.modules.clone(),
      cpu_target: settings.cpu_target.clone(),
      precompile_scripts: Vec::new(),
    }
  }

  pub fn mode(&self) -> SnapshotMode {
    if self.incremental {
      SnapshotMode::Incremental
    } else {
      SnapshotMode::Full
    }
  }
}

/// Artifact selection shared by app and library bundles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactOptions {
  pub include_lazy: bool,
  pub include_transitive: bool,
}

impl Default for ArtifactOptions {
  fn default() -> Self {
    Self {
      include_lazy: false,
      include_transitive: true,
    }
  }
}

/// A published bundle plus the snapshot it carries.
#[derive(Debug, Clone)]
pub struct BundleOutcome {
  pub bundle: AssembledBundle,
  pub snapshot: Snapshot,
  pub artifact_count: usize,
}

/// Build only the snapshot of `project` and write it to `output`.
pub fn create_snapshot(
  project: &Project,
  ctx: &BuildContext<'_>,
  output: &Path,
  options: &SnapshotOptions,
  platform: Option<Platform>,
) -> Result<Snapshot, BundleError> {
  let platform = resolve_platform(platform)?;
  let graph = ctx.package_manager.resolve_dependencies(project)?;
  let request = snapshot_request(project, &graph, options, platform);
  Ok(build_snapshot(ctx.toolchain, &request, output, cache_for(ctx, options))?)
}

fn resolve_platform(platform: Option<Platform>) -> Result<Platform, BundleError> {
  match platform {
    Some(platform) => Ok(platform),
    None => Ok(Platform::host()?),
  }
}

fn cache_for<'a>(ctx: &BuildContext<'a>, options: &SnapshotOptions) -> Option<&'a SnapshotCache> {
  if options.incremental { ctx.cache } else { None }
}

/// The toolchain request for `project`.
///
/// With `filter_stdlibs` the kept modules are the standard modules reachable in
/// the graph plus any listed explicitly.
fn snapshot_request(
  project: &Project,
  graph: &DependencyGraph,
  options: &SnapshotOptions,
  platform: Platform,
) -> SnapshotRequest {
  let module_filter = if options.filter_stdlibs {
    ModuleFilter::only(graph.stdlib_modules().into_iter().chain(options.modules.iter().cloned()))
  } else {
    ModuleFilter::All
  };

  let mut entry_scripts = project.entry_scripts();
  entry_scripts.extend(options.precompile_scripts.iter().map(|p| project.resolve(p)));

  SnapshotRequest {
    project_root: project.root.clone(),
    entry_scripts,
    mode: options.mode(),
    module_filter,
    cpu_target: options.cpu_target.clone(),
    platform,
  }
}

/// Steps shared by app and library bundles, up to an assembler holding every
/// library and the program library.
struct Prepared {
  assembler: Assembler,
  work: TempDir,
  snapshot: Snapshot,
  artifact_count: usize,
  description: BundleDescription,
}

struct PrepareArgs<'p> {
  kind: BundleKind,
  name: String,
  names: LibraryNames,
  output: &'p Path,
  snapshot: &'p SnapshotOptions,
  artifacts: ArtifactOptions,
  platform: Option<Platform>,
}

fn prepare(project: &Project, ctx: &BuildContext<'_>, args: PrepareArgs<'_>) -> Result<Prepared, BundleError> {
  let platform = resolve_platform(args.platform)?;
  let graph = ctx.package_manager.resolve_dependencies(project)?;
  debug!(packages = graph.package_count(), "resolved dependency graph");

  let collected = collect_artifacts(
    &graph,
    &CollectOptions {
      platform,
      include_lazy: args.artifacts.include_lazy,
      include_transitive: args.artifacts.include_transitive,
    },
  )?;

  let parent = output_parent(args.output)?;
  let work = TempDir::with_prefix_in(".relopack-work-", &parent).map_err(|source| BundleError::Io {
    path: parent.clone(),
    source,
  })?;

  let request = snapshot_request(project, &graph, args.snapshot, platform);
  let snapshot = build_snapshot(
    ctx.toolchain,
    &request,
    &work.path().join("snapshot.img"),
    cache_for(ctx, args.snapshot),
  )?;

  let mut assembler = Assembler::new(args.output, platform.os)?;
  add_build_prefixes(&mut assembler, project, ctx.runtime, &collected);

  for artifact in collected.iter() {
    assembler.add_artifact(artifact)?;
  }
  if let Some(runtime) = ctx.runtime {
    for lib in runtime.shared_libraries(platform.os)? {
      assembler.add_library(&lib)?;
    }
  }
  let program = assembler.add_program_library(&snapshot.path, &args.names)?;

  let description = BundleDescription {
    kind: args.kind,
    name: args.name,
    platform,
    snapshot: SnapshotInfo {
      file: program,
      mode: snapshot.mode,
      hash: snapshot.hash.clone(),
      parent: snapshot.parent.clone(),
      module_filter: snapshot.module_filter.clone(),
    },
  };

  Ok(Prepared {
    assembler,
    work,
    snapshot,
    artifact_count: collected.len(),
    description,
  })
}

fn add_build_prefixes(
  assembler: &mut Assembler,
  project: &Project,
  runtime: Option<&RuntimeInstall>,
  artifacts: &ArtifactSet,
) {
  let rewriter = assembler.rewriter_mut();
  rewriter.add_prefix(&project.root);
  if let Some(runtime) = runtime {
    rewriter.add_prefix(&runtime.root);
  }
  for artifact in artifacts.iter() {
    if let Some(dir) = artifact.source.parent() {
      rewriter.add_prefix(dir);
    }
  }
}

fn output_parent(output: &Path) -> Result<PathBuf, BundleError> {
  let parent = match output.parent() {
    Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
    _ => std::env::current_dir().map_err(|source| BundleError::Io {
      path: output.to_path_buf(),
      source,
    })?,
  };
  std::fs::create_dir_all(&parent).map_err(|source| BundleError::Io {
    path: parent.clone(),
    source,
  })?;
  Ok(parent)
}

#[cfg(test)]
pub(crate) mod testutil;
