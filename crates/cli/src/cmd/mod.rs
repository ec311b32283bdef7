//! Subcommand implementations and the arguments they share.

mod app;
mod audit;
mod info;
mod library;
mod snapshot;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;

use relopack_lib::bundle::{ArtifactOptions, BuildContext, BundleOutcome, SnapshotOptions};
use relopack_lib::compile::CargoLauncherCompiler;
use relopack_lib::graph::LockfilePackageManager;
use relopack_lib::platform::Platform;
use relopack_lib::platform::paths::launcher_target_dir;
use relopack_lib::project::Project;
use relopack_lib::runtime::RuntimeInstall;
use relopack_lib::snapshot::{CommandToolchain, SnapshotCache};

use crate::output::{format_duration, format_finding, print_json, print_stat, print_success, print_warning, truncate_hash};

pub use app::{AppArgs, cmd_app};
pub use audit::{AuditArgs, cmd_audit};
pub use info::cmd_info;
pub use library::{LibraryArgs, cmd_library};
pub use snapshot::{SnapshotArgs, cmd_snapshot};

#[derive(Debug, Args)]
pub struct ProjectArgs {
  /// Project directory holding relopack.toml
  #[arg(default_value = ".")]
  pub project: PathBuf,

  /// Runtime installation to bundle (default: $RELOPACK_RUNTIME_DIR)
  #[arg(long, value_name = "DIR")]
  pub runtime: Option<PathBuf>,

  /// Target platform as ARCH-OS (default: host)
  #[arg(long)]
  pub platform: Option<Platform>,
}

/// Snapshot settings; each flag overrides the project manifest.
#[derive(Debug, Args)]
pub struct SnapshotFlags {
  /// Layer the snapshot on the runtime's base image
  #[arg(long)]
  pub incremental: bool,

  /// Keep only the standard modules the project reaches
  #[arg(long)]
  pub filter_stdlibs: bool,

  /// Extra standard module to keep when filtering (repeatable)
  #[arg(long = "module", value_name = "NAME")]
  pub modules: Vec<String>,

  /// CPU target forwarded to the compiler
  #[arg(long)]
  pub cpu_target: Option<String>,

  /// Script executed while building the snapshot (repeatable)
  #[arg(long = "precompile", value_name = "SCRIPT")]
  pub precompile_scripts: Vec<PathBuf>,
}

impl SnapshotFlags {
  pub fn apply(&self, options: &mut SnapshotOptions) {
    options.incremental |= self.incremental;
    options.filter_stdlibs |= self.filter_stdlibs;
    options.modules.extend(self.modules.iter().cloned());
    if let Some(cpu) = &self.cpu_target {
      options.cpu_target = Some(cpu.clone());
    }
    options.precompile_scripts.extend(self.precompile_scripts.iter().map(|p| from_cwd(p)));
  }
}

#[derive(Debug, Args)]
pub struct ArtifactFlags {
  /// Also bundle artifacts marked lazy
  #[arg(long)]
  pub include_lazy: bool,

  /// Only bundle artifacts of the project's direct dependencies
  #[arg(long)]
  pub no_transitive: bool,
}

impl ArtifactFlags {
  pub fn apply(&self, options: &mut ArtifactOptions) {
    options.include_lazy = self.include_lazy;
    options.include_transitive = !self.no_transitive;
  }
}

/// The collaborators a build runs against, owned for the duration of a command.
pub struct Toolset {
  package_manager: LockfilePackageManager,
  runtime: RuntimeInstall,
  toolchain: CommandToolchain,
  compiler: CargoLauncherCompiler,
  cache: SnapshotCache,
}

impl Toolset {
  /// Find the runtime and, when `needs_launcher`, the launcher sources.
  pub fn locate(runtime: Option<&Path>, launcher_src: Option<&Path>, needs_launcher: bool) -> Result<Self> {
    let runtime = RuntimeInstall::locate(runtime).context("Failed to locate the runtime installation")?;

    let compiler = if needs_launcher {
      CargoLauncherCompiler::locate(launcher_src).context("Failed to locate the launcher sources")?
    } else {
      CargoLauncherCompiler::new(launcher_src.unwrap_or(Path::new(".")), launcher_target_dir())
    };
    debug!(runtime = %runtime.root.display(), compiler = %runtime.compiler.display(), "using toolset");

    Ok(Self {
      package_manager: LockfilePackageManager,
      toolchain: CommandToolchain::from_runtime(&runtime),
      runtime,
      compiler,
      cache: SnapshotCache::default_cache(),
    })
  }

  pub fn context(&self) -> BuildContext<'_> {
    BuildContext {
      package_manager: &self.package_manager,
      toolchain: &self.toolchain,
      launcher_compiler: &self.compiler,
      runtime: Some(&self.runtime),
      cache: Some(&self.cache),
    }
  }
}

/// Paths given on the command line are relative to the working directory,
/// not the project.
pub fn from_cwd(path: &Path) -> PathBuf {
  std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

pub fn load_project(dir: &Path) -> Result<Project> {
  Project::load(dir).with_context(|| format!("Failed to load project: {}", dir.display()))
}

/// Summarise a published bundle, or dump its manifest as JSON.
pub fn report_outcome(outcome: &BundleOutcome, json: bool, elapsed: Duration, verbose: bool) -> Result<()> {
  let bundle = &outcome.bundle;
  if json {
    return print_json(&bundle.manifest);
  }

  let manifest = &bundle.manifest;
  print_success(&format!("Bundle created: {}", bundle.root.display()));
  print_stat("Name", &manifest.name);
  print_stat("Platform", &manifest.platform.to_string());

  let mut snapshot = format!("{} {}", outcome.snapshot.mode, truncate_hash(&outcome.snapshot.hash.0));
  if outcome.snapshot.cached {
    snapshot.push_str(" (cached)");
  }
  print_stat("Snapshot", &snapshot);
  if !manifest.executables.is_empty() {
    print_stat("Executables", &manifest.executables.join(", "));
  }
  print_stat("Libraries", &manifest.libraries.len().to_string());
  print_stat("Artifacts", &outcome.artifact_count.to_string());
  print_stat("Time", &format_duration(elapsed));

  let warnings: Vec<_> = bundle.findings.iter().filter(|f| f.kind.is_warning()).collect();
  if !warnings.is_empty() {
    println!();
    print_warning(&format!("{} reference(s) to the build machine remain", warnings.len()));
    if verbose {
      for finding in warnings {
        eprintln!("  {}", format_finding(finding));
      }
    } else {
      eprintln!("  Run 'relopack audit {}' for details.", bundle.root.display());
    }
  }

  Ok(())
}
