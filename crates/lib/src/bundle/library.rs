use std::path::PathBuf;

use tracing::info;

use super::{ArtifactOptions, BuildContext, BundleError, BundleOutcome, PrepareArgs, SnapshotOptions, prepare};
use crate::layout::{BundleKind, LibraryNames};
use crate::platform::Platform;
use crate::project::Project;

#[derive(Debug, Clone)]
pub struct LibraryOptions {
  pub output: PathBuf,
  /// Library name; the project's library name when `None`.
  pub name: Option<String>,
  /// Version for the file name; the manifest's when `None`.
  pub version: Option<String>,
  /// Headers in addition to the manifest's, relative to the project root.
  pub headers: Vec<PathBuf>,
  pub snapshot: SnapshotOptions,
  pub artifacts: ArtifactOptions,
  pub force: bool,
  pub platform: Option<Platform>,
}

impl LibraryOptions {
  pub fn new(project: &Project, output: impl Into<PathBuf>) -> Self {
    Self {
      output: output.into(),
      name: None,
      version: None,
      headers: Vec::new(),
      snapshot: SnapshotOptions::from_project(project),
      artifacts: ArtifactOptions::default(),
      force: false,
      platform: None,
    }
  }
}

/// Build a shared-library bundle: the program library (with version links),
/// every collected library and the public headers under `include/`.
pub fn create_library(
  project: &Project,
  ctx: &BuildContext<'_>,
  options: &LibraryOptions,
) -> Result<BundleOutcome, BundleError> {
  let decl = project.manifest.library.clone().unwrap_or_default();
  let name = options.name.clone().unwrap_or_else(|| project.library_name().to_string());
  let version = options.version.clone().or(decl.version);
  info!(library = %name, version = ?version, "creating library bundle");

  let platform = match options.platform {
    Some(platform) => platform,
    None => Platform::host()?,
  };
  let names = LibraryNames::new(&name, version.as_deref(), platform.os);

  let mut prepared = prepare(
    project,
    ctx,
    PrepareArgs {
      kind: BundleKind::Library,
      name,
      names,
      output: &options.output,
      snapshot: &options.snapshot,
      artifacts: options.artifacts,
      platform: Some(platform),
    },
  )?;

  for header in decl.headers.iter().chain(options.headers.iter()) {
    prepared.assembler.add_header(&project.resolve(header))?;
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

#[cfg(test)]
mod tests {
  use std::fs;

  use super::*;
  use crate::bundle::testutil::{Fixture, lib_name};
  use crate::layout::{BundleManifest, library_dir};
  use crate::snapshot::{ModuleFilter, SnapshotError, SnapshotMode};

  #[test]
  fn library_bundle_carries_headers_and_no_launchers() {
    let fx = Fixture::new();
    fs::create_dir_all(fx.project_dir().join("include")).unwrap();
    fs::write(fx.project_dir().join("include/hello.h"), "int hello_add(int, int);\n").unwrap();
    fx.manifest_extra("\n[library]\nname = \"hellolib\"\nheaders = [\"include/hello.h\"]\n");
    let project = fx.project();
    let output = fx.out("lib");

    create_library(&project, &fx.context(), &LibraryOptions::new(&project, &output)).unwrap();

    assert!(output.join("include/hello.h").is_file());
    assert!(output.join(library_dir(fx.platform.os)).join(lib_name("hellolib")).exists());
    assert!(fx.compiler.compiled().is_empty());
    let manifest = BundleManifest::read(&output).unwrap();
    assert_eq!(manifest.headers, vec!["hello.h".to_string()]);
    assert!(manifest.executables.is_empty());
  }

  #[cfg(target_os = "linux")]
  #[test]
  fn versioned_library_has_links() {
    let fx = Fixture::new();
    let project = fx.project();
    let output = fx.out("lib");
    let mut options = LibraryOptions::new(&project, &output);
    options.version = Some("1.4.2".to_string());

    let outcome = create_library(&project, &fx.context(), &options).unwrap();

    let lib = output.join("lib");
    assert!(lib.join("libhello.so.1.4.2").is_file());
    assert!(lib.join("libhello.so.1").is_symlink());
    assert!(lib.join("libhello.so").is_symlink());
    assert_eq!(outcome.bundle.manifest.snapshot.file, PathBuf::from("lib/libhello.so.1.4.2"));
  }

  #[test]
  fn filter_keeps_required_stdlibs() {
    let fx = Fixture::new();
    fx.add_stdlib("Text");
    let project = fx.project();
    let mut options = LibraryOptions::new(&project, fx.out("lib"));
    options.snapshot.filter_stdlibs = true;
    options.snapshot.modules = vec!["Dates".to_string()];

    let outcome = create_library(&project, &fx.context(), &options).unwrap();

    assert_eq!(outcome.snapshot.module_filter, ModuleFilter::only(["Dates", "Text"]));
  }

  #[test]
  fn incremental_with_filter_is_rejected() {
    let fx = Fixture::new();
    let project = fx.project();
    let output = fx.out("lib");
    let mut options = LibraryOptions::new(&project, &output);
    options.snapshot.incremental = true;
    options.snapshot.filter_stdlibs = true;

    let err = create_library(&project, &fx.context(), &options).unwrap_err();
    assert!(matches!(err, BundleError::Snapshot(SnapshotError::FilterRequiresFull)));
    assert!(!output.exists());
  }

  #[test]
  fn incremental_bundle_records_parent_snapshot() {
    let fx = Fixture::new();
    let project = fx.project();
    let mut options = LibraryOptions::new(&project, fx.out("lib"));
    options.snapshot.incremental = true;

    let outcome = create_library(&project, &fx.context(), &options).unwrap();

    assert_eq!(outcome.snapshot.mode, SnapshotMode::Incremental);
    assert!(outcome.bundle.manifest.snapshot.parent.is_some());
  }
}
