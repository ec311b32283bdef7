use std::ffi::c_void;
use std::path::PathBuf;

use libloading::Library;
use tracing::debug;

use super::{LaunchError, SnapshotLocator};

/// Name handed to the platform loader for a bundled library.
///
/// macOS only searches the launcher's `LC_RPATH` entries for `@rpath/` names;
/// the other platforms search the executable's run path (Linux) or directory
/// (Windows) for bare names.
pub(crate) fn loader_name(library: &str) -> String {
  if cfg!(target_os = "macos") {
    format!("@rpath/{}", library)
  } else {
    library.to_string()
  }
}

/// Locates the program library with the platform loader and asks the loader
/// where it came from.
///
/// Loaded libraries stay loaded for the life of the locator.
#[derive(Default)]
pub struct LoaderLocator {
  loaded: Vec<Library>,
}

impl LoaderLocator {
  pub fn new() -> Self {
    Self::default()
  }
}

impl SnapshotLocator for LoaderLocator {
  fn locate(&mut self, library: &str, probe_symbol: &str) -> Result<PathBuf, LaunchError> {
    let not_found = |reason: String| LaunchError::SnapshotNotFound {
      library: library.to_string(),
      reason,
    };

    // SAFETY: the program library is part of this bundle; its initialisers
    // only register code with the runtime.
    let lib = unsafe { Library::new(loader_name(library)) }.map_err(|e| not_found(e.to_string()))?;

    // SAFETY: only the symbol's address is used, never its value.
    let address = unsafe { lib.get::<*const c_void>(probe_symbol.as_bytes()) }
      .map(|sym| *sym)
      .map_err(|e| not_found(e.to_string()))?;

    let path = loaded_from(address).ok_or_else(|| not_found("the loader did not report a path".to_string()))?;
    let path = dunce::canonicalize(&path).unwrap_or(path);
    debug!(library, path = %path.display(), "loader resolved program library");

    self.loaded.push(lib);
    Ok(path)
  }
}

#[cfg(unix)]
fn loaded_from(address: *const c_void) -> Option<PathBuf> {
  use std::ffi::CStr;
  use std::os::unix::ffi::OsStrExt;

  // SAFETY: Dl_info is plain data; all-zero is a valid value.
  let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
  // SAFETY: `info` is a valid out-pointer; dladdr only reads `address`.
  if unsafe { libc::dladdr(address, &mut info) } == 0 || info.dli_fname.is_null() {
    return None;
  }
  // SAFETY: dladdr returned a NUL-terminated path owned by the loader.
  let name = unsafe { CStr::from_ptr(info.dli_fname) };
  Some(PathBuf::from(std::ffi::OsStr::from_bytes(name.to_bytes())))
}

#[cfg(windows)]
fn loaded_from(address: *const c_void) -> Option<PathBuf> {
  use std::ffi::OsString;
  use std::os::windows::ffi::OsStringExt;

  use windows_sys::Win32::Foundation::HMODULE;
  use windows_sys::Win32::System::LibraryLoader::{
    GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS, GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT, GetModuleFileNameW,
    GetModuleHandleExW,
  };

  let mut module: HMODULE = std::ptr::null_mut();
  // SAFETY: with FROM_ADDRESS the name argument is an address inside the module.
  let ok = unsafe {
    GetModuleHandleExW(
      GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS | GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
      address as *const u16,
      &mut module,
    )
  };
  if ok == 0 {
    return None;
  }

  let mut buf = vec![0u16; 32_768];
  // SAFETY: `buf` is writable for its full length.
  let len = unsafe { GetModuleFileNameW(module, buf.as_mut_ptr(), buf.len() as u32) } as usize;
  if len == 0 || len >= buf.len() {
    return None;
  }
  Some(PathBuf::from(OsString::from_wide(&buf[..len])))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unloadable_library_is_snapshot_not_found() {
    let mut locator = LoaderLocator::new();
    let err = locator.locate("librelopack-missing-program.so", "main").unwrap_err();
    assert!(matches!(err, LaunchError::SnapshotNotFound { .. }));
    assert_eq!(err.exit_code(), super::super::EXIT_SNAPSHOT_NOT_FOUND);
  }

  #[cfg(all(target_os = "linux", target_env = "gnu"))]
  #[test]
  fn loader_reports_absolute_path_of_system_library() {
    let mut locator = LoaderLocator::new();
    let path = locator.locate("libc.so.6", "printf").unwrap();
    assert!(path.is_absolute());
    assert!(path.exists());
  }

  #[cfg(not(target_os = "macos"))]
  #[test]
  fn bare_names_pass_through() {
    assert_eq!(loader_name("libhello.so"), "libhello.so");
  }
}
