//! Bootstrap executable shipped in every app bundle.
//!
//! Built once per bundle: the program library, entry symbol and runtime
//! library names are baked in at compile time.

use relopack_lib::consts::{LAUNCHER_LOG_ENV, RUNTIME_LIBRARY};
use relopack_lib::launcher::{DylibRuntime, EXIT_BOOTSTRAP_FAILURE, Launcher, LoaderLocator};
use relopack_lib::platform::Os;
use relopack_lib::project::DEFAULT_ENTRY_SYMBOL;
use tracing::error;
use tracing_subscriber::EnvFilter;

const PROGRAM_LIBRARY: Option<&str> = option_env!("RELOPACK_PROGRAM_LIBNAME");
const ENTRY_SYMBOL: Option<&str> = option_env!("RELOPACK_ENTRY_SYMBOL");
const RUNTIME_LIBNAME: Option<&str> = option_env!("RELOPACK_RUNTIME_LIBNAME");

fn runtime_library() -> Option<String> {
  match RUNTIME_LIBNAME {
    Some(name) => Some(name.to_string()),
    None => Os::current().map(|os| os.dylib_file_name(RUNTIME_LIBRARY)),
  }
}

fn run() -> i32 {
  let Some(program) = PROGRAM_LIBRARY else {
    error!("launcher was built without a program library name");
    return EXIT_BOOTSTRAP_FAILURE;
  };
  let Some(runtime_library) = runtime_library() else {
    error!("no runtime library name for this platform");
    return EXIT_BOOTSTRAP_FAILURE;
  };

  let runtime = match DylibRuntime::load(&runtime_library) {
    Ok(runtime) => runtime,
    Err(e) => {
      error!(error = %e, "runtime unavailable");
      return e.exit_code();
    }
  };

  let entry = ENTRY_SYMBOL.unwrap_or(DEFAULT_ENTRY_SYMBOL);
  let mut launcher = Launcher::new(runtime, LoaderLocator::new(), program, entry);
  let args = std::env::args_os().map(|a| a.to_string_lossy().into_owned()).collect();
  launcher.run(args)
}

fn main() {
  let filter = EnvFilter::try_from_env(LAUNCHER_LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  std::process::exit(run());
}
