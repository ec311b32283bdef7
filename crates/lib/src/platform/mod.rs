//! Target platform identification.
//!
//! Artifacts are declared per platform and bundles are built for exactly one
//! platform. A platform is written as an `arch-os` triple (e.g. `x86_64-linux`).

pub mod arch;
pub mod os;
pub mod paths;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub use arch::Arch;
pub use os::Os;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
  #[error("malformed platform triple '{0}' (expected 'arch-os')")]
  Malformed(String),

  #[error("unknown architecture '{0}'")]
  UnknownArch(String),

  #[error("unknown operating system '{0}'")]
  UnknownOs(String),

  #[error("the current host platform is not supported")]
  UnsupportedHost,
}

/// Platform identifier combining architecture and OS (e.g., "aarch64-darwin")
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Platform {
  pub arch: Arch,
  pub os: Os,
}

impl Platform {
  /// Create a new platform identifier
  pub fn new(arch: Arch, os: Os) -> Self {
    Self { arch, os }
  }

  /// Detect the current platform at runtime
  ///
  /// Returns `None` if the OS or architecture is not supported
  pub fn current() -> Option<Self> {
    Some(Self {
      arch: Arch::current()?,
      os: Os::current()?,
    })
  }

  /// Like [`Platform::current`], but as an error for callers that propagate.
  pub fn host() -> Result<Self, PlatformError> {
    Self::current().ok_or(PlatformError::UnsupportedHost)
  }

  /// Returns the platform triple string (e.g., "aarch64-darwin")
  pub fn triple(&self) -> String {
    format!("{}-{}", self.arch, self.os)
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.triple())
  }
}

impl FromStr for Platform {
  type Err = PlatformError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    // Arch names may not contain '-', so split on the first one.
    let (arch, os) = s.split_once('-').ok_or_else(|| PlatformError::Malformed(s.to_string()))?;
    Ok(Self {
      arch: arch.parse()?,
      os: os.parse()?,
    })
  }
}

impl Serialize for Platform {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.triple())
  }
}

impl<'de> Deserialize<'de> for Platform {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
  }
}
