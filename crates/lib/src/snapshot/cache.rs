//! Cache of incremental snapshots.
//!
//! Incremental snapshots are tied to the runtime build that produced them and
//! to the code compiled into them, so the cache key covers the request, the
//! base image hash and a digest of the project sources. Full snapshots are
//! never cached.
//!
//! # Layout
//!
//! ```text
//! {cache_dir}/snapshots/
//! ├── .cache.lock
//! ├── <key>.img        # snapshot blob
//! └── <key>.json       # CacheEntry metadata
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use walkdir::DirEntry;

use super::types::{SnapshotError, SnapshotRequest};
use crate::cache_lock::{CacheLock, LockMode};
use crate::layout::{DEPOT_DIR, MANIFEST_FILE};
use crate::platform::paths::snapshot_cache_dir;
use crate::util::hash::{ContentHash, Hashable, ObjectHash, hash_bytes, hash_file, hash_tree};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub key: ObjectHash,
  pub hash: ContentHash,
  pub parent: ContentHash,
  pub created_at: u64,
}

#[derive(Serialize)]
struct CacheKey<'a> {
  request: &'a SnapshotRequest,
  parent: &'a ContentHash,
  sources: &'a ContentHash,
}

impl Hashable for CacheKey<'_> {}

/// Digest of everything a snapshot is compiled from: the project tree
/// (lockfile included) and every entry script, wherever it lives.
///
/// Hidden entries, published bundles and `exclude` are left out, so build
/// outputs written into the project do not change the digest.
pub fn source_digest(request: &SnapshotRequest, exclude: &Path) -> Result<ContentHash, SnapshotError> {
  let tree = hash_tree(&request.project_root, |entry| is_source_entry(entry, exclude))?;
  let mut records = format!("tree {}\n", tree);
  for script in &request.entry_scripts {
    records.push_str(&format!("script {} {}\n", script.display(), hash_file(script)?));
  }
  let digest = hash_bytes(records.as_bytes());
  trace!(project = %request.project_root.display(), digest = %digest, "hashed snapshot sources");
  Ok(digest)
}

fn is_source_entry(entry: &DirEntry, exclude: &Path) -> bool {
  let hidden = entry.file_name().to_string_lossy().starts_with('.');
  let bundle = entry.file_type().is_dir() && entry.path().join(DEPOT_DIR).join(MANIFEST_FILE).is_file();
  !hidden && !bundle && entry.path() != exclude
}

#[derive(Debug, Clone)]
pub struct SnapshotCache {
  base_path: PathBuf,
}

impl SnapshotCache {
  pub fn new(base_path: PathBuf) -> Self {
    Self { base_path }
  }

  /// The cache under the user's cache directory.
  pub fn default_cache() -> Self {
    Self::new(snapshot_cache_dir())
  }

  pub fn base_path(&self) -> &Path {
    &self.base_path
  }

  /// Cache key for `request` layered on `parent`, with `sources` from
  /// [`source_digest`].
  pub fn key(
    request: &SnapshotRequest,
    parent: &ContentHash,
    sources: &ContentHash,
  ) -> Result<ObjectHash, SnapshotError> {
    Ok(CacheKey {
      request,
      parent,
      sources,
    }
    .compute_hash()?)
  }

  fn blob_path(&self, key: &ObjectHash) -> PathBuf {
    self.base_path.join(format!("{}.img", key))
  }

  fn meta_path(&self, key: &ObjectHash) -> PathBuf {
    self.base_path.join(format!("{}.json", key))
  }

  /// Look up a cached snapshot, verifying the blob still matches its metadata.
  pub fn lookup(&self, key: &ObjectHash) -> Result<Option<(PathBuf, CacheEntry)>, SnapshotError> {
    if !self.base_path.exists() {
      return Ok(None);
    }
    let _lock = CacheLock::acquire(&self.base_path, LockMode::Shared, "snapshot-lookup")?;

    let content = match fs::read_to_string(self.meta_path(key)) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(SnapshotError::Io(e)),
    };
    let entry: CacheEntry = match serde_json::from_str(&content) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(key = %key, error = %e, "ignoring unreadable cache entry");
        return Ok(None);
      }
    };

    let blob = self.blob_path(key);
    match hash_file(&blob) {
      Ok(hash) if hash == entry.hash => {
        debug!(key = %key, "snapshot cache hit");
        Ok(Some((blob, entry)))
      }
      Ok(_) => {
        warn!(key = %key, "cached snapshot does not match its recorded hash, ignoring");
        Ok(None)
      }
      Err(_) => Ok(None),
    }
  }

  /// Copy `snapshot` into the cache under `key`.
  pub fn store(&self, key: &ObjectHash, snapshot: &Path, parent: &ContentHash) -> Result<CacheEntry, SnapshotError> {
    let _lock = CacheLock::acquire(&self.base_path, LockMode::Exclusive, "snapshot-store")?;

    let entry = CacheEntry {
      key: key.clone(),
      hash: hash_file(snapshot)?,
      parent: parent.clone(),
      created_at: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
    };

    // Blob first, metadata last: a lookup only trusts a blob with metadata.
    let blob_tmp = self.base_path.join(format!("{}.img.tmp", key));
    fs::copy(snapshot, &blob_tmp)?;
    fs::rename(&blob_tmp, self.blob_path(key))?;

    let meta_tmp = self.base_path.join(format!("{}.json.tmp", key));
    fs::write(&meta_tmp, serde_json::to_string_pretty(&entry)?)?;
    fs::rename(&meta_tmp, self.meta_path(key))?;

    debug!(key = %key, "stored snapshot in cache");
    Ok(entry)
  }
}
