//! The runtime embedding API, reached through its shared library.
//!
//! The runtime library (`libruntime.so`, `libruntime.dylib`, `runtime.dll`)
//! exports:
//!
//! ```c
//! int  rt_parse_opts(int argc, const char **argv);       // options consumed after argv[0], < 0 on error
//! int  rt_init_with_config(const rt_config *config);     // optional, 0 on success
//! int  rt_init(const char *image_file);                  // 0 on success
//! void rt_atexit(int exit_code);
//!
//! typedef struct {
//!   const char *image_file;
//!   const char *depot_path;
//!   const char *load_path;
//! } rt_config;
//! ```
//!
//! When `rt_init_with_config` is missing, the depot and load paths go through
//! `RELOPACK_DEPOT_PATH` and `RELOPACK_LOAD_PATH` instead, set right before
//! `rt_init`.
//!
//! The program library exports the entry symbol as
//! `int <entry>(int argc, const char **argv)`.

use std::ffi::{CString, c_char, c_int};
use std::path::Path;

use libloading::{Library, Symbol};
use tracing::{debug, warn};

use super::locate::loader_name;
use super::{LaunchError, PreInitConfig, Runtime};
use crate::consts::{DEPOT_PATH_ENV, LOAD_PATH_ENV};

type ParseOptsFn = unsafe extern "C" fn(c_int, *const *const c_char) -> c_int;
type InitWithConfigFn = unsafe extern "C" fn(*const RtConfig) -> c_int;
type InitFn = unsafe extern "C" fn(*const c_char) -> c_int;
type AtExitFn = unsafe extern "C" fn(c_int);
type EntryFn = unsafe extern "C" fn(c_int, *const *const c_char) -> c_int;

#[repr(C)]
struct RtConfig {
  image_file: *const c_char,
  depot_path: *const c_char,
  load_path: *const c_char,
}

/// NUL-terminated argument vector kept alive for the duration of a call.
struct Argv {
  _owned: Vec<CString>,
  ptrs: Vec<*const c_char>,
}

impl Argv {
  fn new(args: &[String]) -> Result<Self, LaunchError> {
    let owned = args
      .iter()
      .map(|a| CString::new(a.as_str()).map_err(|_| LaunchError::Args(format!("argument contains NUL: {:?}", a))))
      .collect::<Result<Vec<_>, _>>()?;
    let mut ptrs: Vec<*const c_char> = owned.iter().map(|s| s.as_ptr()).collect();
    ptrs.push(std::ptr::null());
    Ok(Self { _owned: owned, ptrs })
  }

  fn argc(&self) -> c_int {
    (self.ptrs.len() - 1) as c_int
  }

  fn as_ptr(&self) -> *const *const c_char {
    self.ptrs.as_ptr()
  }
}

fn c_string(value: &str) -> Result<CString, LaunchError> {
  CString::new(value).map_err(|_| LaunchError::Init(format!("value contains NUL: {:?}", value)))
}

fn c_path(path: &Path) -> Result<CString, LaunchError> {
  CString::new(path.as_os_str().as_encoded_bytes())
    .map_err(|_| LaunchError::Init(format!("path contains NUL: {}", path.display())))
}

pub struct DylibRuntime {
  name: String,
  runtime: Library,
  program: Option<Library>,
}

impl DylibRuntime {
  /// Load the runtime library by its file name through the platform loader.
  pub fn load(library: &str) -> Result<Self, LaunchError> {
    // SAFETY: loading the runtime runs its initialisers; the bundle ships it
    // next to the launcher and nothing else is running yet.
    let runtime = unsafe { Library::new(loader_name(library)) }.map_err(|e| LaunchError::RuntimeUnavailable {
      library: library.to_string(),
      reason: e.to_string(),
    })?;
    debug!(library, "loaded runtime library");
    Ok(Self {
      name: library.to_string(),
      runtime,
      program: None,
    })
  }

  fn symbol<T>(&self, name: &[u8]) -> Option<Symbol<'_, T>> {
    // SAFETY: callers name symbols of the documented C ABI with matching types.
    unsafe { self.runtime.get::<T>(name) }.ok()
  }

  fn required<T>(&self, name: &'static str) -> Result<Symbol<'_, T>, LaunchError> {
    self.symbol(name.as_bytes()).ok_or_else(|| LaunchError::Init(format!("{} does not export {}", self.name, name)))
  }

  fn init_with_env(&self, config: &PreInitConfig, image: &CString) -> Result<c_int, LaunchError> {
    // SAFETY: the bootstrap is single-threaded until the runtime initialises.
    unsafe {
      std::env::set_var(DEPOT_PATH_ENV, &config.depot_path);
      std::env::set_var(LOAD_PATH_ENV, &config.load_path);
    }
    let init: Symbol<InitFn> = self.required("rt_init")?;
    // SAFETY: `image` outlives the call.
    Ok(unsafe { init(image.as_ptr()) })
  }
}

impl Runtime for DylibRuntime {
  fn parse_options(&mut self, args: Vec<String>) -> Result<Vec<String>, LaunchError> {
    let parse: Symbol<ParseOptsFn> = self.required("rt_parse_opts")?;
    let argv = Argv::new(&args)?;
    // SAFETY: `argv` is NUL-terminated and lives until the call returns.
    let consumed = unsafe { parse(argv.argc(), argv.as_ptr()) };
    if consumed < 0 {
      return Err(LaunchError::Args(format!("runtime rejected its options (code {})", consumed)));
    }

    let consumed = consumed as usize;
    let mut iter = args.into_iter();
    let mut program_args: Vec<String> = iter.next().into_iter().collect();
    program_args.extend(iter.skip(consumed));
    Ok(program_args)
  }

  fn init(&mut self, config: &PreInitConfig) -> Result<(), LaunchError> {
    let image = c_path(&config.image_file)?;

    let code = match self.symbol::<InitWithConfigFn>(b"rt_init_with_config") {
      Some(init) => {
        let depot = c_string(&config.depot_path)?;
        let load = c_string(&config.load_path)?;
        let rt_config = RtConfig {
          image_file: image.as_ptr(),
          depot_path: depot.as_ptr(),
          load_path: load.as_ptr(),
        };
        // SAFETY: every string in `rt_config` outlives the call.
        unsafe { init(&rt_config) }
      }
      None => {
        debug!("runtime takes no direct configuration, using environment");
        self.init_with_env(config, &image)?
      }
    };
    if code != 0 {
      return Err(LaunchError::Init(format!("initialisation returned {}", code)));
    }

    // SAFETY: the runtime has mapped this image already; this only takes a
    // second reference for entry lookup.
    let program = unsafe { Library::new(&config.image_file) }.map_err(|e| LaunchError::Init(e.to_string()))?;
    self.program = Some(program);
    Ok(())
  }

  fn run(&mut self, entry: &str, args: &[String]) -> Result<i32, LaunchError> {
    let program = self
      .program
      .as_ref()
      .ok_or_else(|| LaunchError::Init("runtime is not initialised".to_string()))?;

    // SAFETY: the entry symbol has the documented signature.
    let func: Symbol<EntryFn> = unsafe { program.get(entry.as_bytes()) }.map_err(|e| LaunchError::EntryNotFound {
      symbol: entry.to_string(),
      reason: e.to_string(),
    })?;

    let argv = Argv::new(args)?;
    // SAFETY: `argv` is NUL-terminated and lives until the call returns.
    Ok(unsafe { func(argv.argc(), argv.as_ptr()) })
  }

  fn shutdown(&mut self, exit_code: i32) {
    match self.symbol::<AtExitFn>(b"rt_atexit") {
      // SAFETY: called once, after a successful init.
      Some(atexit) => unsafe { atexit(exit_code) },
      None => warn!(library = %self.name, "runtime exports no rt_atexit, skipping shutdown hook"),
    }
  }
}
