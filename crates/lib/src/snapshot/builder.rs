use std::fs;
use std::path::Path;

use tempfile::TempDir;
use tracing::{debug, info};

use super::cache::{SnapshotCache, source_digest};
use super::toolchain::Toolchain;
use super::types::{Snapshot, SnapshotError, SnapshotMode, SnapshotRequest};
use crate::util::hash::hash_file;

const STAGED_NAME: &str = "snapshot.img";

/// Build the snapshot described by `request` and publish it at `output`.
///
/// The toolchain writes into a staging directory next to `output`, so a failed
/// build never leaves a partial file behind. Incremental snapshots are looked up
/// in and stored to `cache` when one is given, keyed on the current content of
/// the project sources.
pub fn build_snapshot(
  toolchain: &dyn Toolchain,
  request: &SnapshotRequest,
  output: &Path,
  cache: Option<&SnapshotCache>,
) -> Result<Snapshot, SnapshotError> {
  request.validate()?;

  let parent = match request.mode {
    SnapshotMode::Incremental => Some(toolchain.base_image().ok_or(SnapshotError::MissingBaseImage)?),
    SnapshotMode::Full => None,
  };

  let out_dir = match output.parent() {
    Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
    _ => std::env::current_dir()?,
  };
  fs::create_dir_all(&out_dir)?;
  let staging = TempDir::with_prefix_in(".snapshot-", &out_dir)?;
  let staged = staging.path().join(STAGED_NAME);

  let cache_key = match (&parent, cache) {
    (Some(parent), Some(_)) => Some(SnapshotCache::key(request, parent, &source_digest(request, output)?)?),
    _ => None,
  };

  let mut cached = false;
  if let (Some(key), Some(cache)) = (&cache_key, cache)
    && let Some((blob, _)) = cache.lookup(key)?
  {
    info!(key = %key, "reusing cached incremental snapshot");
    fs::copy(&blob, &staged)?;
    cached = true;
  }

  if !cached {
    toolchain
      .compile_snapshot(request, &staged)
      .map_err(|failure| SnapshotError::Build {
        diagnostic: failure.diagnostic,
        code: failure.code,
      })?;

    match fs::metadata(&staged) {
      Ok(meta) if meta.len() > 0 => {}
      _ => return Err(SnapshotError::Empty),
    }

    if let (Some(key), Some(cache), Some(parent)) = (&cache_key, cache, &parent) {
      cache.store(key, &staged, parent)?;
    }
  }

  let hash = hash_file(&staged)?;
  fs::rename(&staged, output)?;
  debug!(path = %output.display(), hash = %hash, "snapshot published");

  Ok(Snapshot {
    path: output.to_path_buf(),
    mode: request.mode,
    hash,
    parent,
    module_filter: request.module_filter.clone(),
    cached,
  })
}
