//! `relopack snapshot`: build only the snapshot file.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;

use relopack_lib::bundle::{SnapshotOptions, create_snapshot};

use super::{ProjectArgs, SnapshotFlags, Toolset, load_project};
use crate::output::{format_bytes, format_duration, print_json, print_stat, print_success, truncate_hash};

#[derive(Debug, Args)]
pub struct SnapshotArgs {
  #[command(flatten)]
  pub project: ProjectArgs,

  /// File to write the snapshot to
  #[arg(short, long)]
  pub output: PathBuf,

  #[command(flatten)]
  pub snapshot: SnapshotFlags,

  /// Print the snapshot description as JSON
  #[arg(long)]
  pub json: bool,
}

pub fn cmd_snapshot(args: &SnapshotArgs) -> Result<()> {
  let started = Instant::now();
  let project = load_project(&args.project.project)?;
  let tools = Toolset::locate(args.project.runtime.as_deref(), None, false)?;

  let mut options = SnapshotOptions::from_project(&project);
  args.snapshot.apply(&mut options);

  let snapshot = create_snapshot(&project, &tools.context(), &args.output, &options, args.project.platform)
    .with_context(|| format!("Failed to build snapshot for {}", project.name()))?;

  if args.json {
    return print_json(&snapshot);
  }

  print_success(&format!("Snapshot written: {}", snapshot.path.display()));
  print_stat("Mode", snapshot.mode.as_str());
  print_stat("Hash", truncate_hash(&snapshot.hash.0));
  if let Some(parent) = &snapshot.parent {
    print_stat("Parent", truncate_hash(&parent.0));
  }
  if let Ok(meta) = std::fs::metadata(&snapshot.path) {
    print_stat("Size", &format_bytes(meta.len()));
  }
  if snapshot.cached {
    print_stat("Cache", "reused");
  }
  print_stat("Time", &format_duration(started.elapsed()));
  Ok(())
}
