//! Host directories used by the build side.
//!
//! Each location can be overridden through an environment variable so tests and
//! CI jobs can isolate builds from the user's real cache.

use std::path::PathBuf;

use crate::consts::{APP_NAME, CACHE_DIR_ENV, RUNTIME_DIR_ENV};

/// Returns the user's home directory, if the environment names one
#[cfg(windows)]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("USERPROFILE").map(PathBuf::from)
}

/// Returns the user's home directory, if the environment names one
#[cfg(not(windows))]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("HOME").map(PathBuf::from)
}

/// Returns the directory for cache files for the application
#[cfg(windows)]
fn default_cache_dir() -> PathBuf {
  std::env::var_os("LOCALAPPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(std::env::temp_dir)
    .join(APP_NAME)
    .join("Cache")
}

/// Returns the directory for cache files for the application
#[cfg(not(windows))]
fn default_cache_dir() -> PathBuf {
  let cache_home = std::env::var_os("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .or_else(|| home_dir().map(|h| h.join(".cache")))
    .unwrap_or_else(std::env::temp_dir);
  cache_home.join(APP_NAME)
}

/// Root of the snapshot cache.
///
/// `RELOPACK_CACHE` wins over the platform default.
pub fn cache_dir() -> PathBuf {
  if let Some(path) = std::env::var_os(CACHE_DIR_ENV) {
    return PathBuf::from(path);
  }
  default_cache_dir()
}

/// Directory holding cached incremental snapshots.
pub fn snapshot_cache_dir() -> PathBuf {
  cache_dir().join("snapshots")
}

/// Cargo target directory shared by launcher builds.
pub fn launcher_target_dir() -> PathBuf {
  cache_dir().join("launcher-target")
}

/// Runtime installation configured through `RELOPACK_RUNTIME_DIR`, if any.
pub fn runtime_dir() -> Option<PathBuf> {
  std::env::var_os(RUNTIME_DIR_ENV).map(PathBuf::from)
}
