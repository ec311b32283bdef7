use std::fmt;
use std::str::FromStr;

use super::PlatformError;

/// Operating system variants a bundle can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Os {
  Linux,
  MacOs,
  Windows,
}

impl Os {
  /// Detect the current operating system at runtime
  pub fn current() -> Option<Self> {
    match std::env::consts::OS {
      "linux" => Some(Self::Linux),
      "macos" => Some(Self::MacOs),
      "windows" => Some(Self::Windows),
      _ => None,
    }
  }

  /// Returns the lowercase string identifier for this OS
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Linux => "linux",
      Self::MacOs => "darwin",
      Self::Windows => "windows",
    }
  }

  /// File extension of dynamic libraries, without the dot.
  pub fn dylib_ext(&self) -> &'static str {
    match self {
      Self::Linux => "so",
      Self::MacOs => "dylib",
      Self::Windows => "dll",
    }
  }

  /// File name of a dynamic library called `name` (`libfoo.so`, `foo.dll`).
  pub fn dylib_file_name(&self, name: &str) -> String {
    match self {
      Self::Windows => format!("{}.{}", name, self.dylib_ext()),
      _ => format!("lib{}.{}", name, self.dylib_ext()),
    }
  }

  /// Whether `file_name` looks like a dynamic library on this OS.
  ///
  /// Versioned ELF names (`libz.so.1.3`) count.
  pub fn is_dylib(&self, file_name: &str) -> bool {
    match self {
      Self::Linux => file_name.ends_with(".so") || file_name.contains(".so."),
      Self::MacOs => file_name.ends_with(".dylib"),
      Self::Windows => file_name.to_ascii_lowercase().ends_with(".dll"),
    }
  }

  /// File name of an executable called `name`.
  pub fn exe_file_name(&self, name: &str) -> String {
    match self {
      Self::Windows => format!("{}.exe", name),
      _ => name.to_string(),
    }
  }
}

impl fmt::Display for Os {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for Os {
  type Err = PlatformError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "linux" => Ok(Self::Linux),
      "darwin" | "macos" => Ok(Self::MacOs),
      "windows" => Ok(Self::Windows),
      other => Err(PlatformError::UnknownOs(other.to_string())),
    }
  }
}
