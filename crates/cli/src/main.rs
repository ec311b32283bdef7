//! relopack: package programs into relocatable app and library bundles.

mod cmd;
mod output;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cmd::{AppArgs, AuditArgs, LibraryArgs, SnapshotArgs};
use crate::output::print_error;

/// relopack - relocatable app and library bundles
#[derive(Parser)]
#[command(name = "relopack")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build an app bundle with a launcher per executable
  App(AppArgs),

  /// Build a library bundle for embedding in a host program
  Library(LibraryArgs),

  /// Build only the snapshot file
  Snapshot(SnapshotArgs),

  /// Report build-machine paths left in a bundle
  Audit(AuditArgs),

  /// Show platform and runtime information
  Info,
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let result = match &cli.command {
    Commands::App(args) => cmd::cmd_app(args, cli.verbose),
    Commands::Library(args) => cmd::cmd_library(args, cli.verbose),
    Commands::Snapshot(args) => cmd::cmd_snapshot(args),
    Commands::Audit(args) => cmd::cmd_audit(args, cli.verbose),
    Commands::Info => {
      cmd::cmd_info();
      Ok(())
    }
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      print_error(&format!("{:#}", e));
      ExitCode::FAILURE
    }
  }
}
