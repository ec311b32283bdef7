use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{
  ARTIFACT_DIR, ARTIFACTS_FILE, BIN_DIR, BundleDescription, BundleManifest, DEPOT_DIR, INCLUDE_DIR, LayoutError,
  LibraryNames, MANIFEST_VERSION, library_dir,
};
use crate::collect::CollectedArtifact;
use crate::platform::Os;
use crate::relocate::{Finding, PathRewrite, Rewriter};
use crate::util::hash::{ContentHash, hash_file};

const STAGED_ROOT: &str = "bundle";
const PREVIOUS_ROOT: &str = "previous";

#[derive(Debug)]
struct PlacedLibrary {
  source: PathBuf,
  hash: ContentHash,
}

/// A published bundle.
#[derive(Debug, Clone)]
pub struct AssembledBundle {
  pub root: PathBuf,
  pub manifest: BundleManifest,
  /// Relocation findings, ordered by file then offset.
  pub findings: Vec<Finding>,
}

/// Builds a bundle tree in a staging directory beside the output and
/// publishes it with a rename.
///
/// Dropping an unfinished `Assembler` removes the staging directory and leaves
/// the output untouched.
#[derive(Debug)]
pub struct Assembler {
  output: PathBuf,
  os: Os,
  staging: TempDir,
  root: PathBuf,
  rewriter: Rewriter,
  /// file name -> placed library
  libraries: BTreeMap<String, PlacedLibrary>,
  /// artifact name -> source path
  artifacts: BTreeMap<String, PathBuf>,
  executables: Vec<String>,
  /// header file name -> source path
  headers: BTreeMap<String, PathBuf>,
}

impl Assembler {
  pub fn new(output: &Path, os: Os) -> Result<Self, LayoutError> {
    let parent = match output.parent() {
      Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
      _ => std::env::current_dir().map_err(LayoutError::io(output))?,
    };
    fs::create_dir_all(&parent).map_err(LayoutError::io(&parent))?;

    let staging = TempDir::with_prefix_in(".relopack-", &parent).map_err(LayoutError::io(&parent))?;
    let root = staging.path().join(STAGED_ROOT);
    for dir in [BIN_DIR, library_dir(os), DEPOT_DIR] {
      let path = root.join(dir);
      fs::create_dir_all(&path).map_err(LayoutError::io(&path))?;
    }

    debug!(staging = %root.display(), output = %output.display(), "staging bundle");
    Ok(Self {
      output: output.to_path_buf(),
      os,
      staging,
      root,
      rewriter: Rewriter::new(),
      libraries: BTreeMap::new(),
      artifacts: BTreeMap::new(),
      executables: Vec::new(),
      headers: BTreeMap::new(),
    })
  }

  /// Root of the staged tree.
  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn rewriter_mut(&mut self) -> &mut Rewriter {
    &mut self.rewriter
  }

  /// Copy a dynamic library into the library directory.
  ///
  /// A source already placed is not copied again. A file name already taken
  /// by identical content is reused; by different content it is a conflict.
  pub fn add_library(&mut self, source: &Path) -> Result<PathBuf, LayoutError> {
    let file_name = file_name(source)?;
    let relative = Path::new(library_dir(self.os)).join(&file_name);
    let canonical = dunce::canonicalize(source).unwrap_or_else(|_| source.to_path_buf());

    if let Some(placed) = self.libraries.get(&file_name) {
      if placed.source != canonical {
        let hash = hash_file(source)?;
        if hash != placed.hash {
          return Err(LayoutError::Conflict {
            file_name,
            first: placed.source.clone(),
            second: canonical,
          });
        }
        debug!(library = %file_name, source = %source.display(), "identical library already placed");
      }
      self.record_rewrites(source, &canonical, &relative);
      return Ok(relative);
    }

    let dest = self.root.join(&relative);
    fs::copy(source, &dest).map_err(LayoutError::io(source))?;
    let hash = hash_file(&dest)?;
    debug!(library = %file_name, source = %source.display(), "placed library");

    self.libraries.insert(
      file_name,
      PlacedLibrary {
        source: canonical.clone(),
        hash,
      },
    );
    self.record_rewrites(source, &canonical, &relative);
    Ok(relative)
  }

  /// Place a collected artifact.
  ///
  /// Dynamic libraries go to the library directory; anything else is copied
  /// under `depot/artifacts/<name>/`.
  pub fn add_artifact(&mut self, artifact: &CollectedArtifact) -> Result<PathBuf, LayoutError> {
    let source = &artifact.source;
    let is_dylib = source.is_file() && source.file_name().and_then(|n| n.to_str()).is_some_and(|n| self.os.is_dylib(n));

    let relative = if is_dylib {
      self.add_library(source)?
    } else {
      let base = Path::new(DEPOT_DIR).join(ARTIFACT_DIR).join(&artifact.name);
      let relative = if source.is_dir() {
        copy_tree(source, &self.root.join(&base))?;
        base
      } else {
        let relative = base.join(file_name(source)?);
        let dest = self.root.join(&relative);
        create_parent(&dest)?;
        fs::copy(source, &dest).map_err(LayoutError::io(source))?;
        relative
      };
      self.rewriter.record(PathRewrite::new(source, &relative));
      relative
    };

    self.artifacts.insert(artifact.name.clone(), source.clone());
    Ok(relative)
  }

  /// Place the program library carrying the snapshot, plus its version links.
  ///
  /// The program library and its links must not take a file name already
  /// used by a collected library.
  pub fn add_program_library(&mut self, snapshot: &Path, names: &LibraryNames) -> Result<PathBuf, LayoutError> {
    let dir = Path::new(library_dir(self.os));
    for name in std::iter::once(&names.file_name).chain(&names.links) {
      if let Some(placed) = self.libraries.get(name) {
        return Err(LayoutError::Conflict {
          file_name: name.clone(),
          first: placed.source.clone(),
          second: snapshot.to_path_buf(),
        });
      }
    }

    let relative = dir.join(&names.file_name);
    let dest = self.root.join(&relative);
    fs::copy(snapshot, &dest).map_err(LayoutError::io(snapshot))?;

    for link in &names.links {
      create_version_link(&names.file_name, &self.root.join(dir).join(link))?;
    }

    let hash = hash_file(&dest)?;
    self.libraries.insert(
      names.file_name.clone(),
      PlacedLibrary {
        source: snapshot.to_path_buf(),
        hash,
      },
    );
    self.rewriter.mark_image(&relative);
    Ok(relative)
  }

  /// Place a compiled launcher as `bin/<name>`.
  pub fn add_launcher(&mut self, name: &str, compiled: &Path) -> Result<PathBuf, LayoutError> {
    let relative = Path::new(BIN_DIR).join(self.os.exe_file_name(name));
    let dest = self.root.join(&relative);
    fs::copy(compiled, &dest).map_err(LayoutError::io(compiled))?;
    self.executables.push(name.to_string());
    Ok(relative)
  }

  /// Copy a public header into `include/`. Header names must be unique.
  pub fn add_header(&mut self, source: &Path) -> Result<PathBuf, LayoutError> {
    let file_name = file_name(source)?;
    let relative = Path::new(INCLUDE_DIR).join(&file_name);
    let canonical = dunce::canonicalize(source).unwrap_or_else(|_| source.to_path_buf());

    if let Some(first) = self.headers.get(&file_name) {
      if *first != canonical {
        return Err(LayoutError::HeaderConflict {
          file_name,
          first: first.clone(),
          second: canonical,
        });
      }
      return Ok(relative);
    }

    let dest = self.root.join(&relative);
    create_parent(&dest)?;
    fs::copy(source, &dest).map_err(LayoutError::io(source))?;
    self.headers.insert(file_name, canonical);
    Ok(relative)
  }

  fn record_rewrites(&mut self, source: &Path, canonical: &Path, relative: &Path) {
    self.rewriter.record(PathRewrite::new(source, relative));
    if canonical != source {
      self.rewriter.record(PathRewrite::new(canonical, relative));
    }
  }

  /// Write metadata, rewrite build paths and publish the tree at the output path.
  ///
  /// An existing non-empty output is replaced only with `force`; it is moved
  /// aside first and restored if publishing fails.
  pub fn finish(mut self, description: BundleDescription, force: bool) -> Result<AssembledBundle, LayoutError> {
    self.write_artifact_index()?;

    let findings = self.rewriter.apply(&self.root)?;
    for finding in findings.iter().filter(|f| f.kind.is_warning()) {
      debug!(file = %finding.file.display(), reference = %finding.reference, "relocation warning");
    }

    let manifest = BundleManifest {
      version: MANIFEST_VERSION,
      kind: description.kind,
      name: description.name,
      platform: description.platform,
      snapshot: description.snapshot,
      executables: std::mem::take(&mut self.executables),
      libraries: self.libraries.keys().cloned().collect(),
      headers: self.headers.keys().cloned().collect(),
      build_prefixes: self.rewriter.prefixes().iter().map(PathBuf::from).collect(),
      rewrites: self.rewriter.rewrites().to_vec(),
    };
    manifest.write(&self.root)?;

    self.publish(force)?;
    info!(
      output = %self.output.display(),
      libraries = manifest.libraries.len(),
      findings = findings.len(),
      "bundle published"
    );

    Ok(AssembledBundle {
      root: self.output.clone(),
      manifest,
      findings,
    })
  }

  /// `depot/artifacts.toml`: artifact name to its location. Written with
  /// build-machine paths, which the rewriter turns into placeholders.
  fn write_artifact_index(&self) -> Result<(), LayoutError> {
    let index: BTreeMap<&str, String> = self
      .artifacts
      .iter()
      .map(|(name, source)| (name.as_str(), source.to_string_lossy().into_owned()))
      .collect();
    let path = self.root.join(DEPOT_DIR).join(ARTIFACTS_FILE);
    fs::write(&path, toml::to_string(&index)?).map_err(LayoutError::io(&path))
  }

  fn publish(&self, force: bool) -> Result<(), LayoutError> {
    match fs::symlink_metadata(&self.output) {
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => return Err(LayoutError::io(&self.output)(e)),
      Ok(meta) => {
        if meta.is_dir() && is_empty_dir(&self.output)? {
          fs::remove_dir(&self.output).map_err(LayoutError::io(&self.output))?;
        } else if !force {
          return Err(LayoutError::OutputExists(self.output.clone()));
        } else {
          let previous = self.staging.path().join(PREVIOUS_ROOT);
          fs::rename(&self.output, &previous).map_err(LayoutError::io(&self.output))?;
          if let Err(e) = fs::rename(&self.root, &self.output) {
            if let Err(restore) = fs::rename(&previous, &self.output) {
              warn!(error = %restore, output = %self.output.display(), "failed to restore previous output");
            }
            return Err(LayoutError::io(&self.output)(e));
          }
          debug!(output = %self.output.display(), "replaced previous output");
          // `previous` goes away with the staging directory.
          return Ok(());
        }
      }
    }

    fs::rename(&self.root, &self.output).map_err(LayoutError::io(&self.output))
  }
}

fn file_name(path: &Path) -> Result<String, LayoutError> {
  path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .ok_or_else(|| LayoutError::NoFileName(path.to_path_buf()))
}

fn create_parent(path: &Path) -> Result<(), LayoutError> {
  match path.parent() {
    Some(parent) => fs::create_dir_all(parent).map_err(LayoutError::io(parent)),
    None => Ok(()),
  }
}

fn is_empty_dir(path: &Path) -> Result<bool, LayoutError> {
  Ok(fs::read_dir(path).map_err(LayoutError::io(path))?.next().is_none())
}

fn copy_tree(source: &Path, dest: &Path) -> Result<(), LayoutError> {
  for entry in WalkDir::new(source).sort_by_file_name() {
    let entry = entry.map_err(|e| LayoutError::Io {
      path: source.to_path_buf(),
      source: e.into(),
    })?;
    let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
    let target = dest.join(relative);
    if entry.file_type().is_dir() {
      fs::create_dir_all(&target).map_err(LayoutError::io(&target))?;
    } else {
      create_parent(&target)?;
      fs::copy(entry.path(), &target).map_err(LayoutError::io(entry.path()))?;
    }
  }
  Ok(())
}

#[cfg(unix)]
fn create_version_link(target: &str, link: &Path) -> Result<(), LayoutError> {
  std::os::unix::fs::symlink(target, link).map_err(LayoutError::io(link))
}

#[cfg(windows)]
fn create_version_link(target: &str, link: &Path) -> Result<(), LayoutError> {
  let source = link.with_file_name(target);
  fs::copy(&source, link).map(|_| ()).map_err(LayoutError::io(link))
}
