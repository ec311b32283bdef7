//! `relopack app`: build an app bundle.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;

use relopack_lib::bundle::{AppOptions, create_app};
use relopack_lib::project::{DEFAULT_ENTRY_SYMBOL, ExecutableDecl};

use super::{ArtifactFlags, ProjectArgs, SnapshotFlags, Toolset, load_project, report_outcome};

#[derive(Debug, Args)]
pub struct AppArgs {
  #[command(flatten)]
  pub project: ProjectArgs,

  /// Output directory for the bundle
  #[arg(short, long)]
  pub output: PathBuf,

  /// Launcher to create, as NAME or NAME=ENTRY (repeatable; replaces the manifest's list)
  #[arg(long = "executable", value_name = "NAME[=ENTRY]", value_parser = parse_executable)]
  pub executables: Vec<ExecutableDecl>,

  /// Launcher crate sources (default: $RELOPACK_LAUNCHER_SRC)
  #[arg(long, value_name = "DIR")]
  pub launcher_src: Option<PathBuf>,

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

fn parse_executable(s: &str) -> Result<ExecutableDecl, String> {
  let (name, entry) = match s.split_once('=') {
    Some((name, entry)) => (name, entry),
    None => (s, DEFAULT_ENTRY_SYMBOL),
  };
  if name.is_empty() || entry.is_empty() {
    return Err(format!("expected NAME or NAME=ENTRY, got '{}'", s));
  }
  Ok(ExecutableDecl {
    name: name.to_string(),
    entry: entry.to_string(),
  })
}

pub fn cmd_app(args: &AppArgs, verbose: bool) -> Result<()> {
  let started = Instant::now();
  let project = load_project(&args.project.project)?;
  let tools = Toolset::locate(args.project.runtime.as_deref(), args.launcher_src.as_deref(), true)?;

  let mut options = AppOptions::new(&project, &args.output);
  if !args.executables.is_empty() {
    options.executables = args.executables.clone();
  }
  args.snapshot.apply(&mut options.snapshot);
  args.artifacts.apply(&mut options.artifacts);
  options.force = args.force;
  options.platform = args.project.platform;

  let outcome = create_app(&project, &tools.context(), &options)
    .with_context(|| format!("Failed to create app bundle for {}", project.name()))?;

  report_outcome(&outcome, args.json, started.elapsed(), verbose)
}
