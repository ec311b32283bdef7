//! The native launcher bootstrap.
//!
//! Every app bundle carries a small launcher per executable. At process start
//! it runs strictly forward through these states:
//!
//! ```text
//! Uninitialized -> ArgsParsed -> SnapshotLocated -> PathsConfigured
//!               -> RuntimeRunning -> ShutDown
//! ```
//!
//! Any failure moves straight to `Aborted` with an exit code. Nothing is
//! retried: a bootstrap failure means the bundle itself is broken.
//!
//! The snapshot is found through the platform loader, never through a search
//! of our own. The loader reports the absolute path it used, and the bundle
//! root is derived from that path, so a moved bundle still finds itself.
//!
//! # Exit codes
//!
//! | code | meaning |
//! |------|---------|
//! | `0` | program returned normally |
//! | program's | propagated, see [`process_exit_code`] |
//! | [`EXIT_SNAPSHOT_NOT_FOUND`] (78) | the program library could not be loaded |
//! | [`EXIT_BOOTSTRAP_FAILURE`] (70) | any other bootstrap failure |

mod dylib;
mod locate;

use std::fmt;
use std::path::{MAIN_SEPARATOR, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error};

pub use dylib::DylibRuntime;
pub use locate::LoaderLocator;

use crate::layout::{DEPOT_DIR, bundle_root_from_snapshot};

/// `EX_CONFIG`: the bundle is malformed or was moved without its library directory.
pub const EXIT_SNAPSHOT_NOT_FOUND: i32 = 78;

/// `EX_SOFTWARE`: argument parsing, runtime initialisation or entry lookup failed.
pub const EXIT_BOOTSTRAP_FAILURE: i32 = 70;

/// Exit status for a program's return code.
///
/// Unix keeps only the low 8 bits of an exit status. A non-zero code whose low
/// byte is zero (256, 512, ...) would read as success, so it becomes `1`.
/// Windows exit codes are 32 bits wide and pass through unchanged.
pub fn process_exit_code(code: i32) -> i32 {
  if cfg!(windows) || code & 0xff != 0 || code == 0 {
    code
  } else {
    1
  }
}

/// Load path value meaning "the bundled project only".
pub const PROJECT_LOAD_PATH: &str = "@";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
  Uninitialized,
  ArgsParsed,
  SnapshotLocated,
  PathsConfigured,
  RuntimeRunning,
  ShutDown,
  Aborted,
}

impl fmt::Display for LaunchState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(self, f)
  }
}

#[derive(Debug, Error)]
pub enum LaunchError {
  #[error("runtime library {library} could not be loaded: {reason}")]
  RuntimeUnavailable { library: String, reason: String },

  #[error("invalid runtime arguments: {0}")]
  Args(String),

  #[error("program library {library} could not be located: {reason}")]
  SnapshotNotFound { library: String, reason: String },

  #[error("program library {0} is not inside a bundle library directory")]
  Layout(PathBuf),

  #[error("runtime failed to initialise: {0}")]
  Init(String),

  #[error("entry symbol {symbol} not found: {reason}")]
  EntryNotFound { symbol: String, reason: String },
}

impl LaunchError {
  pub fn exit_code(&self) -> i32 {
    match self {
      Self::SnapshotNotFound { .. } => EXIT_SNAPSHOT_NOT_FOUND,
      _ => EXIT_BOOTSTRAP_FAILURE,
    }
  }
}

/// Configuration handed to the runtime before it initialises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreInitConfig {
  /// The snapshot image, i.e. the program library's resolved path.
  pub image_file: PathBuf,
  pub bundle_root: PathBuf,
  /// `<bundle>/depot/`, with a trailing separator: one fixed location, not a search list.
  pub depot_path: String,
  pub load_path: String,
}

impl PreInitConfig {
  pub fn for_snapshot(snapshot: &Path) -> Result<Self, LaunchError> {
    let root = bundle_root_from_snapshot(snapshot).ok_or_else(|| LaunchError::Layout(snapshot.to_path_buf()))?;
    let depot = root.join(DEPOT_DIR);
    Ok(Self {
      image_file: snapshot.to_path_buf(),
      bundle_root: root.to_path_buf(),
      depot_path: format!("{}{}", depot.display(), MAIN_SEPARATOR),
      load_path: PROJECT_LOAD_PATH.to_string(),
    })
  }
}

/// Finds the program library through the platform loader.
pub trait SnapshotLocator {
  /// Load `library` and return the absolute path it was loaded from.
  ///
  /// `probe_symbol` is any symbol the library exports; its address identifies
  /// the loaded file.
  fn locate(&mut self, library: &str, probe_symbol: &str) -> Result<PathBuf, LaunchError>;
}

/// The runtime's embedding interface.
pub trait Runtime {
  /// Strip runtime options from `args` (`args[0]` is the program name) and
  /// return what the program sees.
  fn parse_options(&mut self, args: Vec<String>) -> Result<Vec<String>, LaunchError>;

  fn init(&mut self, config: &PreInitConfig) -> Result<(), LaunchError>;

  /// Call `entry` in the program library and return its exit code.
  fn run(&mut self, entry: &str, args: &[String]) -> Result<i32, LaunchError>;

  /// Release runtime resources. Called exactly once after a successful `init`.
  fn shutdown(&mut self, exit_code: i32);
}

/// Drives one process start through the bootstrap states.
pub struct Launcher<R, L> {
  runtime: R,
  locator: L,
  library: String,
  entry: String,
  state: LaunchState,
  history: Vec<LaunchState>,
}

impl<R: Runtime, L: SnapshotLocator> Launcher<R, L> {
  pub fn new(runtime: R, locator: L, library: impl Into<String>, entry: impl Into<String>) -> Self {
    Self {
      runtime,
      locator,
      library: library.into(),
      entry: entry.into(),
      state: LaunchState::Uninitialized,
      history: vec![LaunchState::Uninitialized],
    }
  }

  pub fn state(&self) -> LaunchState {
    self.state
  }

  /// Every state entered so far, in order.
  pub fn history(&self) -> &[LaunchState] {
    &self.history
  }

  pub fn runtime(&self) -> &R {
    &self.runtime
  }

  fn enter(&mut self, state: LaunchState) {
    debug!(from = %self.state, to = %state, "launcher state");
    self.state = state;
    self.history.push(state);
  }

  fn abort(&mut self, err: &LaunchError) -> i32 {
    error!(state = %self.state, error = %err, "launch aborted");
    self.enter(LaunchState::Aborted);
    err.exit_code()
  }

  /// Run the program with the process arguments and return the exit code.
  pub fn run(&mut self, args: Vec<String>) -> i32 {
    let program_args = match self.runtime.parse_options(args) {
      Ok(args) => args,
      Err(e) => return self.abort(&e),
    };
    self.enter(LaunchState::ArgsParsed);

    let snapshot = match self.locator.locate(&self.library, &self.entry) {
      Ok(path) => path,
      Err(e) => return self.abort(&e),
    };
    debug!(snapshot = %snapshot.display(), "located program library");
    self.enter(LaunchState::SnapshotLocated);

    let config = match PreInitConfig::for_snapshot(&snapshot) {
      Ok(config) => config,
      Err(e) => return self.abort(&e),
    };
    self.enter(LaunchState::PathsConfigured);

    if let Err(e) = self.runtime.init(&config) {
      return self.abort(&e);
    }
    self.enter(LaunchState::RuntimeRunning);

    let code = match self.runtime.run(&self.entry, &program_args) {
      Ok(code) => code,
      Err(e) => {
        error!(error = %e, "program did not run");
        e.exit_code()
      }
    };

    self.runtime.shutdown(code);
    self.enter(LaunchState::ShutDown);
    process_exit_code(code)
  }
}
