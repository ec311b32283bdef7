//! Crate-wide constants.

/// Application name, used for cache and config directory names.
pub const APP_NAME: &str = "relopack";

/// Length of the truncated hash used for cache entry names.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Project manifest file name.
pub const PROJECT_FILE: &str = "relopack.toml";

/// Resolved dependency lockfile written by the package manager.
pub const LOCK_FILE: &str = "relopack.lock";

/// Overrides the snapshot cache location.
pub const CACHE_DIR_ENV: &str = "RELOPACK_CACHE";

/// Points at the language runtime installation used for snapshots and bundled libraries.
pub const RUNTIME_DIR_ENV: &str = "RELOPACK_RUNTIME_DIR";

/// Overrides the snapshot compiler command.
pub const TOOLCHAIN_ENV: &str = "RELOPACK_TOOLCHAIN";

/// Log filter for launchers, read at bundle run time.
pub const LAUNCHER_LOG_ENV: &str = "RELOPACK_LOG";

/// Location of the launcher crate sources used to compile per-bundle launchers.
pub const LAUNCHER_SRC_ENV: &str = "RELOPACK_LAUNCHER_SRC";

/// Compile-time variables baked into each launcher.
pub const PROGRAM_LIBNAME_ENV: &str = "RELOPACK_PROGRAM_LIBNAME";
pub const ENTRY_SYMBOL_ENV: &str = "RELOPACK_ENTRY_SYMBOL";
pub const RUNTIME_LIBNAME_ENV: &str = "RELOPACK_RUNTIME_LIBNAME";

/// Base name of the runtime's embedding library (`libruntime.so`).
pub const RUNTIME_LIBRARY: &str = "runtime";

/// Runtime configuration variables, set only when the runtime cannot take
/// its configuration directly.
pub const DEPOT_PATH_ENV: &str = "RELOPACK_DEPOT_PATH";
pub const LOAD_PATH_ENV: &str = "RELOPACK_LOAD_PATH";
