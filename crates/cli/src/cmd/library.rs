//! `relopack library`: build a library bundle for embedding.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;

use relopack_lib::bundle::{LibraryOptions, create_library};

use super::{ArtifactFlags, ProjectArgs, SnapshotFlags, Toolset, from_cwd, load_project, report_outcome};

#[derive(Debug, Args)]
pub struct LibraryArgs {
  #[command(flatten)]
  pub project: ProjectArgs,

  /// Output directory for the bundle
  #[arg(short, long)]
  pub output: PathBuf,

  /// Library name (default: manifest [library] name, else project name)
  #[arg(long)]
  pub name: Option<String>,

  /// Library version, e.g. 1.2.0
  #[arg(long = "lib-version", value_name = "VERSION")]
  pub version: Option<String>,

  /// Header to ship in include/ (repeatable; added to the manifest's list)
  #[arg(long = "header", value_name = "FILE")]
  pub headers: Vec<PathBuf>,

  #[command(flatten)]
  pub snapshot: SnapshotFlags,

  #[command(flatten)]
  pub artifacts: ArtifactFlags,

  /// Replace an existing non-empty output directory
  #[arg(short, long)]
  pub force: bool,

  /// Print the bundle manifest as JSON
  #[arg(long)]
  pub json: bool,
}

pub fn cmd_library(args: &LibraryArgs, verbose: bool) -> Result<()> {
  let started = Instant::now();
  let project = load_project(&args.project.project)?;
  let tools = Toolset::locate(args.project.runtime.as_deref(), None, false)?;

  let mut options = LibraryOptions::new(&project, &args.output);
  if let Some(name) = &args.name {
    options.name = Some(name.clone());
  }
  if let Some(version) = &args.version {
    options.version = Some(version.clone());
  }
  options.headers.extend(args.headers.iter().map(|h| from_cwd(h)));
  args.snapshot.apply(&mut options.snapshot);
  args.artifacts.apply(&mut options.artifacts);
  options.force = args.force;
  options.platform = args.project.platform;

  let outcome = create_library(&project, &tools.context(), &options)
    .with_context(|| format!("Failed to create library bundle for {}", project.name()))?;

  report_outcome(&outcome, args.json, started.elapsed(), verbose)
}
