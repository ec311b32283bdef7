use std::path::PathBuf;

use tracing::info;

use super::{ArtifactOptions, BuildContext, BundleError, BundleOutcome, PrepareArgs, SnapshotOptions, prepare};
use crate::compile::LauncherSpec;
use crate::consts::RUNTIME_LIBRARY;
use crate::layout::{BundleKind, LibraryNames};
use crate::platform::Platform;
use crate::project::{ExecutableDecl, Project};

#[derive(Debug, Clone)]
pub struct AppOptions {
  pub output: PathBuf,
  /// Launchers to build; the project's declarations when empty.
  pub executables: Vec<ExecutableDecl>,
  pub snapshot: SnapshotOptions,
  pub artifacts: ArtifactOptions,
  pub force: bool,
  /// Target platform; the host when `None`.
  pub platform: Option<Platform>,
}

impl AppOptions {
  pub fn new(project: &Project, output: impl Into<PathBuf>) -> Self {
    Self {
      output: output.into(),
      executables: Vec::new(),
      snapshot: SnapshotOptions::from_project(project),
      artifacts: ArtifactOptions::default(),
      force: false,
      platform: None,
    }
  }
}

/// Build an executable bundle: one launcher per executable in `bin/`, the
/// program library and every collected library in the library directory.
pub fn create_app(project: &Project, ctx: &BuildContext<'_>, options: &AppOptions) -> Result<BundleOutcome, BundleError> {
  let executables = if options.executables.is_empty() {
    project.executables()
  } else {
    options.executables.clone()
  };
  info!(project = %project.name(), executables = executables.len(), "creating app bundle");

  let platform = match options.platform {
    Some(platform) => platform,
    None => Platform::host()?,
  };
  let names = LibraryNames::new(project.name(), None, platform.os);
  let program_library = names.load_name().to_string();

  let mut prepared = prepare(
    project,
    ctx,
    PrepareArgs {
      kind: BundleKind::App,
      name: project.name().to_string(),
      names,
      output: &options.output,
      snapshot: &options.snapshot,
      artifacts: options.artifacts,
      platform: Some(platform),
    },
  )?;

  for exe in &executables {
    let spec = LauncherSpec {
      executable: exe.name.clone(),
      program_library: program_library.clone(),
      entry: exe.entry.clone(),
      runtime_library: platform.os.dylib_file_name(RUNTIME_LIBRARY),
      os: platform.os,
    };
    let compiled = prepared.work.path().join(platform.os.exe_file_name(&exe.name));
    ctx.launcher_compiler.compile(&spec, &compiled)?;
    prepared.assembler.add_launcher(&exe.name, &compiled)?;
  }

  let bundle = prepared.assembler.finish(prepared.description, options.force)?;
  let mut snapshot = prepared.snapshot;
  snapshot.path = bundle.root.join(&bundle.manifest.snapshot.file);

  Ok(BundleOutcome {
    bundle,
    snapshot,
    artifact_count: prepared.artifact_count,
  })
}
