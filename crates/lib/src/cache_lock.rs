//! File lock serialising access to the snapshot cache.
//!
//! Bundle outputs belong to one build, but the snapshot cache is shared by
//! every build on the machine. Readers hold a shared lock, writers an
//! exclusive one. A contended lock is retried until a deadline instead of
//! failing outright, since the other holder is usually a build that finishes
//! within seconds.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

const LOCK_FILE: &str = ".cache.lock";

/// How long `acquire` waits for a contended lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

const RETRY_START: Duration = Duration::from_millis(10);
const RETRY_MAX: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  Shared,
  Exclusive,
}

/// Who holds an exclusive lock, as recorded in the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
  pub pid: u32,
  pub purpose: String,
  pub since_unix: u64,
}

impl std::fmt::Display for LockHolder {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} (PID {})", self.purpose, self.pid)
  }
}

#[derive(Debug, Error)]
pub enum CacheLockError {
  #[error("gave up on the snapshot cache lock after {waited:?}; held by {}\nremove {} if no relopack build is running", holder_label(.holder), .lock_path.display())]
  Timeout {
    holder: Option<LockHolder>,
    waited: Duration,
    lock_path: PathBuf,
  },

  #[error("failed to prepare lock file {path}: {source}")]
  Open {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to lock {path}: {source}")]
  Lock {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// A held cache lock; released when dropped.
#[derive(Debug)]
pub struct CacheLock {
  file: File,
  path: PathBuf,
  mode: LockMode,
}

impl CacheLock {
  /// Lock the cache rooted at `dir`, waiting up to [`DEFAULT_LOCK_TIMEOUT`].
  pub fn acquire(dir: &Path, mode: LockMode, purpose: &str) -> Result<Self, CacheLockError> {
    Self::acquire_within(dir, mode, purpose, DEFAULT_LOCK_TIMEOUT)
  }

  pub fn acquire_within(dir: &Path, mode: LockMode, purpose: &str, timeout: Duration) -> Result<Self, CacheLockError> {
    let path = dir.join(LOCK_FILE);
    let open_err = |source| CacheLockError::Open {
      path: path.clone(),
      source,
    };

    std::fs::create_dir_all(dir).map_err(open_err)?;
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&path)
      .map_err(open_err)?;

    let started = Instant::now();
    let mut delay = RETRY_START;
    loop {
      match try_lock(&file, mode) {
        Ok(()) => break,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
          let waited = started.elapsed();
          if waited >= timeout {
            return Err(CacheLockError::Timeout {
              holder: read_holder(&path),
              waited,
              lock_path: path,
            });
          }
          trace!(lock = %path.display(), ?delay, "cache lock busy");
          thread::sleep(delay.min(timeout - waited));
          delay = (delay * 2).min(RETRY_MAX);
        }
        Err(source) => return Err(CacheLockError::Lock { path, source }),
      }
    }

    let lock = Self { file, path, mode };
    if mode == LockMode::Exclusive {
      lock.record_holder(purpose)?;
    }
    debug!(lock = %lock.path.display(), ?mode, purpose, "cache locked");
    Ok(lock)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn mode(&self) -> LockMode {
    self.mode
  }

  /// The recorded holder, read through the held handle.
  pub fn holder(&self) -> Option<LockHolder> {
    let mut file = &self.file;
    file.seek(SeekFrom::Start(0)).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    serde_json::from_str(&contents).ok()
  }

  fn record_holder(&self, purpose: &str) -> Result<(), CacheLockError> {
    let holder = LockHolder {
      pid: std::process::id(),
      purpose: purpose.to_string(),
      since_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default(),
    };
    let json = serde_json::to_vec(&holder).map_err(|e| CacheLockError::Lock {
      path: self.path.clone(),
      source: io::Error::other(e),
    })?;

    let mut file = &self.file;
    file
      .set_len(0)
      .and_then(|_| file.seek(SeekFrom::Start(0)))
      .and_then(|_| file.write_all(&json))
      .and_then(|_| file.flush())
      .map_err(|source| CacheLockError::Lock {
        path: self.path.clone(),
        source,
      })
  }
}

fn holder_label(holder: &Option<LockHolder>) -> String {
  match holder {
    Some(holder) => holder.to_string(),
    None => "an unknown process".to_string(),
  }
}

fn read_holder(path: &Path) -> Option<LockHolder> {
  let contents = std::fs::read_to_string(path).ok()?;
  serde_json::from_str(&contents).ok()
}

#[cfg(unix)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let op = match mode {
    LockMode::Shared => FlockOperation::NonBlockingLockShared,
    LockMode::Exclusive => FlockOperation::NonBlockingLockExclusive,
  };
  flock(file.as_fd(), op).map_err(io::Error::from)
}

#[cfg(windows)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let flags = match mode {
    LockMode::Shared => LOCKFILE_FAIL_IMMEDIATELY,
    LockMode::Exclusive => LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
  };

  // SAFETY: the handle is owned by `file` for the duration of the call and a
  // zeroed OVERLAPPED requests a lock starting at offset 0.
  let ok = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(file.as_raw_handle() as HANDLE, flags, 0, 1, 0, &mut overlapped)
  };
  if ok != 0 {
    return Ok(());
  }

  let err = io::Error::last_os_error();
  if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
    Err(io::Error::from(io::ErrorKind::WouldBlock))
  } else {
    Err(err)
  }
}
