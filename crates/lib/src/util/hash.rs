//! SHA-256 hashing for cache keys and content identity.
//!
//! [`ObjectHash`] names a value (a snapshot request, say) by its serialized
//! form; [`ContentHash`] identifies bytes on disk.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

use crate::consts::OBJ_HASH_PREFIX_LEN;

/// Truncated hex digest of a value's JSON form, used to name cache entries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHash(pub String);

impl std::fmt::Display for ObjectHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

/// Values that can name themselves by content.
pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<ObjectHash, serde_json::Error> {
    let json = serde_json::to_vec(self)?;
    let mut digest = hex_digest(Sha256::digest(&json));
    digest.truncate(OBJ_HASH_PREFIX_LEN);
    Ok(ObjectHash(digest))
  }
}

/// Full hex SHA-256 of some content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, Error)]
pub enum HashError {
  #[error("failed to walk {path}: {source}")]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

fn hex_digest(digest: impl std::fmt::LowerHex) -> String {
  format!("{:x}", digest)
}

pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash(hex_digest(Sha256::digest(data)))
}

/// Stream a file through the hasher.
pub fn hash_file(path: &Path) -> Result<ContentHash, HashError> {
  let read_err = |source| HashError::Read {
    path: path.to_path_buf(),
    source,
  };
  let mut file = File::open(path).map_err(read_err)?;
  let mut hasher = Sha256::new();
  io::copy(&mut file, &mut hasher).map_err(read_err)?;
  Ok(ContentHash(hex_digest(hasher.finalize())))
}

/// Hash a directory tree: relative paths, file contents and symlink targets.
///
/// Timestamps and permissions are ignored, and paths use `/` on every
/// platform, so identical trees hash equal wherever they are built.
pub fn hash_directory(root: &Path) -> Result<ContentHash, HashError> {
  hash_tree(root, |_| true)
}

/// [`hash_directory`] over the entries `keep` accepts. A rejected directory
/// is not descended into.
pub fn hash_tree(root: &Path, mut keep: impl FnMut(&DirEntry) -> bool) -> Result<ContentHash, HashError> {
  let mut hasher = Sha256::new();

  let walk = WalkDir::new(root)
    .min_depth(1)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|entry| keep(entry));
  for entry in walk {
    let entry = entry.map_err(|source| HashError::Walk {
      path: root.to_path_buf(),
      source,
    })?;
    let relative = entry
      .path()
      .strip_prefix(root)
      .unwrap_or(entry.path())
      .to_string_lossy()
      .replace('\\', "/");

    let file_type = entry.file_type();
    let record = if file_type.is_symlink() {
      let target = std::fs::read_link(entry.path()).map_err(|source| HashError::Read {
        path: entry.path().to_path_buf(),
        source,
      })?;
      format!("link {} {}\n", relative, target.to_string_lossy().replace('\\', "/"))
    } else if file_type.is_dir() {
      format!("dir {}\n", relative)
    } else if file_type.is_file() {
      format!("file {} {}\n", relative, hash_file(entry.path())?)
    } else {
      continue;
    };
    hasher.update(record.as_bytes());
  }

  Ok(ContentHash(hex_digest(hasher.finalize())))
}

#[cfg(test)]
mod tests {
  use std::fs;

  use super::*;
  use tempfile::tempdir;

  #[derive(Serialize)]
  struct Key<'a> {
    name: &'a str,
  }

  impl Hashable for Key<'_> {}

  #[test]
  fn object_hash_is_truncated_and_stable() {
    let a = Key { name: "app" }.compute_hash().unwrap();
    assert_eq!(a, Key { name: "app" }.compute_hash().unwrap());
    assert_eq!(a.0.len(), OBJ_HASH_PREFIX_LEN);
    assert_ne!(a, Key { name: "lib" }.compute_hash().unwrap());
  }

  #[test]
  fn known_digest() {
    assert_eq!(
      hash_bytes(b"").0,
      "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
  }

  #[test]
  fn file_and_bytes_agree() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("libz.so");
    fs::write(&path, b"\x7fELF\x00payload").unwrap();
    assert_eq!(hash_file(&path).unwrap(), hash_bytes(b"\x7fELF\x00payload"));
  }

  #[test]
  fn missing_file_reports_path() {
    let temp = tempdir().unwrap();
    let missing = temp.path().join("nope");
    match hash_file(&missing) {
      Err(HashError::Read { path, .. }) => assert_eq!(path, missing),
      other => panic!("expected read error, got {:?}", other),
    }
  }

  #[test]
  fn directory_hash_tracks_content_and_layout() {
    let flat = tempdir().unwrap();
    fs::write(flat.path().join("a.txt"), "content").unwrap();
    let before = hash_directory(flat.path()).unwrap();

    fs::write(flat.path().join("a.txt"), "changed").unwrap();
    assert_ne!(before, hash_directory(flat.path()).unwrap());

    let nested = tempdir().unwrap();
    fs::create_dir(nested.path().join("sub")).unwrap();
    fs::write(nested.path().join("sub/a.txt"), "content").unwrap();
    assert_ne!(before, hash_directory(nested.path()).unwrap());
  }

  #[test]
  fn filtered_tree_skips_rejected_directories() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("main.src"), "run()").unwrap();
    let keep = |e: &DirEntry| e.file_name() != "cache";
    let before = hash_tree(temp.path(), keep).unwrap();

    fs::create_dir(temp.path().join("cache")).unwrap();
    fs::write(temp.path().join("cache/blob"), "noise").unwrap();
    assert_eq!(before, hash_tree(temp.path(), keep).unwrap());
    assert_ne!(before, hash_directory(temp.path()).unwrap());
  }

  #[test]
  fn directory_hash_ignores_location() {
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    for dir in [a.path(), b.path()] {
      fs::create_dir(dir.join("lib")).unwrap();
      fs::write(dir.join("lib/libhello.so"), "image").unwrap();
    }
    assert_eq!(hash_directory(a.path()).unwrap(), hash_directory(b.path()).unwrap());
  }
}
