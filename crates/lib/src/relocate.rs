//! Relocation rewriting and auditing.
//!
//! A bundle must not reference the build machine's filesystem. Before a bundle
//! is published, the [`Rewriter`] scans every file in the staged tree:
//!
//! - Text files (configuration and metadata) have each absolute path of a file
//!   that was copied into the bundle replaced by `${BUNDLE_ROOT}/<relative>`.
//!   Every replacement is reported as [`FindingKind::Rewritten`].
//! - Any other build-machine path left in a text file is reported as an
//!   [`WarningCategory::External`] warning: it points at something the bundle
//!   does not carry.
//! - Binary files are never patched. Build-machine paths inside a compiled
//!   snapshot image are reported as [`WarningCategory::ReflectionOnly`]
//!   warnings. In any other binary they are [`WarningCategory::External`]:
//!   a native library's run path or install name decides whether the moved
//!   bundle loads at all.
//!
//! # Reflection-only paths
//!
//! A compiled snapshot keeps the source locations it was compiled from for stack
//! traces and introspection. Those paths stay embedded: nothing opens them
//! while the program runs, so they do not affect whether a moved bundle
//! executes. They are reported so a user can see what an inspecting tool would
//! reveal about the build machine, and are never treated as errors.
//!
//! [`audit`] performs the same scan read-only on a published bundle and also
//! checks that every `${BUNDLE_ROOT}` reference resolves inside the bundle.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use memchr::memmem;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Placeholder standing for the absolute path of the bundle root.
pub const BUNDLE_ROOT_PLACEHOLDER: &str = "${BUNDLE_ROOT}";

/// Bytes inspected when deciding whether a file is text.
const SNIFF_LEN: usize = 8192;

#[derive(Debug, Error)]
pub enum RelocateError {
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
    source: std::io::Error,
  },

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// An absolute build-machine path and the bundle-relative path it was copied to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRewrite {
  pub from: PathBuf,
  pub to: PathBuf,
}

impl PathRewrite {
  pub fn new(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
    Self {
      from: from.into(),
      to: to.into(),
    }
  }

  /// The `${BUNDLE_ROOT}/...` form written in place of `from`.
  pub fn replacement(&self) -> String {
    placeholder_path(&self.to)
  }
}

/// Render a bundle-relative path in placeholder form, with `/` separators.
pub fn placeholder_path(relative: &Path) -> String {
  let parts: Vec<String> = relative
    .components()
    .map(|c| c.as_os_str().to_string_lossy().into_owned())
    .collect();
  format!("{}/{}", BUNDLE_ROOT_PLACEHOLDER, parts.join("/"))
}

/// Replace every `${BUNDLE_ROOT}` in `text` with `root`.
pub fn expand_placeholders(text: &str, root: &Path) -> String {
  text.replace(BUNDLE_ROOT_PLACEHOLDER, &root.to_string_lossy())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WarningCategory {
  /// Embedded in compiled code for debugging or introspection only.
  ReflectionOnly,
  /// Points at a build-machine file the bundle does not contain.
  External,
  /// A `${BUNDLE_ROOT}` reference to a file missing from the bundle.
  Dangling,
}

impl fmt::Display for WarningCategory {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::ReflectionOnly => "reflection-only",
      Self::External => "external",
      Self::Dangling => "dangling",
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "category")]
pub enum FindingKind {
  Rewritten,
  Warning(WarningCategory),
}

impl FindingKind {
  pub fn is_warning(&self) -> bool {
    matches!(self, Self::Warning(_))
  }
}

/// One embedded path reference found in a bundle file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
  /// File containing the reference, relative to the bundle root.
  pub file: PathBuf,
  /// Byte offset of the reference in the file as it was scanned.
  pub offset: usize,
  /// The reference as found.
  pub reference: String,
  /// What replaced it, for rewritten references.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub replacement: Option<String>,
  #[serde(flatten)]
  pub kind: FindingKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Needle {
  Rewrite(usize),
  Prefix,
  Placeholder,
}

#[derive(Debug)]
struct Hit {
  start: usize,
  /// Bytes of the needle itself.
  matched: usize,
  /// Bytes replaced or reported, including any path tail after the needle.
  len: usize,
  needle: Needle,
}

impl Hit {
  /// At one position a known rewrite beats a bare prefix, then the most
  /// specific needle wins.
  fn order(&self, other: &Self) -> std::cmp::Ordering {
    let rank = |hit: &Self| matches!(hit.needle, Needle::Prefix);
    self
      .start
      .cmp(&other.start)
      .then(rank(self).cmp(&rank(other)))
      .then(other.matched.cmp(&self.matched))
      .then(other.len.cmp(&self.len))
  }
}

/// Rewrites build-machine paths in a staged bundle tree.
#[derive(Debug, Clone, Default)]
pub struct Rewriter {
  rewrites: Vec<PathRewrite>,
  prefixes: Vec<String>,
  skip: Vec<PathBuf>,
  /// Bundle-relative paths of compiled snapshot images.
  images: Vec<PathBuf>,
}

impl Rewriter {
  pub fn new() -> Self {
    Self::default()
  }

  /// Treat paths under `prefix` as belonging to the build machine.
  pub fn add_prefix(&mut self, prefix: &Path) {
    let prefix = prefix.to_string_lossy().into_owned();
    if !prefix.is_empty() && !self.prefixes.contains(&prefix) {
      self.prefixes.push(prefix);
    }
  }

  pub fn prefixes(&self) -> &[String] {
    &self.prefixes
  }

  pub fn record(&mut self, rewrite: PathRewrite) {
    if !self.rewrites.contains(&rewrite) {
      self.rewrites.push(rewrite);
    }
  }

  pub fn rewrites(&self) -> &[PathRewrite] {
    &self.rewrites
  }

  /// Leave the file at `relative` untouched and unreported.
  pub fn skip(&mut self, relative: impl Into<PathBuf>) {
    self.skip.push(relative.into());
  }

  /// Mark the file at `relative` as a compiled snapshot image, whose
  /// embedded build paths are reflection-only.
  pub fn mark_image(&mut self, relative: impl Into<PathBuf>) {
    let relative = relative.into();
    if !self.images.contains(&relative) {
      self.images.push(relative);
    }
  }

  /// Rewrite every text file under `root` in place.
  ///
  /// Findings are ordered by file path, then by offset.
  pub fn apply(&self, root: &Path) -> Result<Vec<Finding>, RelocateError> {
    self.scan(root, true)
  }

  fn scan(&self, root: &Path, write: bool) -> Result<Vec<Finding>, RelocateError> {
    let mut findings = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
      let entry = entry.map_err(|e| RelocateError::Walk {
        path: root.to_path_buf(),
        source: e,
      })?;
      if !entry.file_type().is_file() {
        continue;
      }

      let path = entry.path();
      let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
      if self.skip.iter().any(|s| *s == relative) {
        trace!(file = %relative.display(), "skipping");
        continue;
      }

      let content = fs::read(path).map_err(|e| RelocateError::Read {
        path: path.to_path_buf(),
        source: e,
      })?;

      if is_text(&content) {
        let (rewritten, mut found) = self.scan_text(&content, &relative, write, root);
        if write && let Some(new) = rewritten {
          fs::write(path, new).map_err(|e| RelocateError::Write {
            path: path.to_path_buf(),
            source: e,
          })?;
          debug!(file = %relative.display(), "rewrote embedded paths");
        }
        findings.append(&mut found);
      } else {
        findings.extend(self.scan_binary(&content, &relative));
      }
    }

    Ok(findings)
  }

  fn scan_text(&self, content: &[u8], file: &Path, write: bool, root: &Path) -> (Option<Vec<u8>>, Vec<Finding>) {
    let mut hits = Vec::new();
    if write {
      for (idx, rewrite) in self.rewrites.iter().enumerate() {
        let needle = rewrite.from.to_string_lossy();
        for start in memmem::find_iter(content, needle.as_bytes()) {
          let end = start + needle.len();
          // `from` must end on a path component boundary; a file inside a
          // copied directory takes its path tail along.
          let tail = match content.get(end).copied() {
            None => 0,
            Some(b'/' | b'\\') => token_len(content, end, false),
            Some(b) if is_terminator(b, false) => 0,
            Some(_) => continue,
          };
          hits.push(Hit {
            start,
            matched: needle.len(),
            len: needle.len() + tail,
            needle: Needle::Rewrite(idx),
          });
        }
      }
    } else {
      for start in memmem::find_iter(content, BUNDLE_ROOT_PLACEHOLDER.as_bytes()) {
        let len = token_len(content, start + BUNDLE_ROOT_PLACEHOLDER.len(), false) + BUNDLE_ROOT_PLACEHOLDER.len();
        hits.push(Hit {
          start,
          matched: len,
          len,
          needle: Needle::Placeholder,
        });
      }
    }
    for prefix in &self.prefixes {
      for start in memmem::find_iter(content, prefix.as_bytes()) {
        hits.push(Hit {
          start,
          matched: prefix.len(),
          len: prefix.len() + token_len(content, start + prefix.len(), false),
          needle: Needle::Prefix,
        });
      }
    }

    hits.sort_by(|a, b| a.order(b));

    let mut findings = Vec::new();
    let mut output = Vec::with_capacity(content.len());
    let mut cursor = 0;
    let mut changed = false;

    for hit in hits {
      if hit.start < cursor {
        continue;
      }
      let reference = String::from_utf8_lossy(&content[hit.start..hit.start + hit.len]).into_owned();
      output.extend_from_slice(&content[cursor..hit.start]);

      let (kind, replacement) = match hit.needle {
        Needle::Rewrite(idx) => {
          let tail = String::from_utf8_lossy(&content[hit.start + hit.matched..hit.start + hit.len]);
          let replacement = format!("{}{}", self.rewrites[idx].replacement(), tail.replace('\\', "/"));
          output.extend_from_slice(replacement.as_bytes());
          changed = true;
          (FindingKind::Rewritten, Some(replacement))
        }
        Needle::Placeholder => {
          output.extend_from_slice(reference.as_bytes());
          let resolved = PathBuf::from(expand_placeholders(&reference, root));
          if resolved.exists() {
            (FindingKind::Rewritten, None)
          } else {
            (FindingKind::Warning(WarningCategory::Dangling), None)
          }
        }
        Needle::Prefix => {
          output.extend_from_slice(reference.as_bytes());
          (FindingKind::Warning(WarningCategory::External), None)
        }
      };

      findings.push(Finding {
        file: file.to_path_buf(),
        offset: hit.start,
        reference,
        replacement,
        kind,
      });
      cursor = hit.start + hit.len;
    }
    output.extend_from_slice(&content[cursor..]);

    (changed.then_some(output), findings)
  }

  fn scan_binary(&self, content: &[u8], file: &Path) -> Vec<Finding> {
    let mut hits: Vec<(usize, usize)> = Vec::new();
    for prefix in &self.prefixes {
      for start in memmem::find_iter(content, prefix.as_bytes()) {
        hits.push((start, prefix.len() + token_len(content, start + prefix.len(), true)));
      }
    }
    hits.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

    let category = if self.images.iter().any(|image| image == file) {
      WarningCategory::ReflectionOnly
    } else {
      WarningCategory::External
    };

    let mut findings = Vec::new();
    let mut cursor = 0;
    for (start, len) in hits {
      if start < cursor {
        continue;
      }
      findings.push(Finding {
        file: file.to_path_buf(),
        offset: start,
        reference: String::from_utf8_lossy(&content[start..start + len]).into_owned(),
        replacement: None,
        kind: FindingKind::Warning(category),
      });
      cursor = start + len;
    }
    findings
  }
}

/// Scan a published bundle for build-machine references without modifying it.
///
/// `images` lists the bundle-relative snapshot images; build paths in any other
/// binary are reported as external.
pub fn audit(
  root: &Path,
  prefixes: &[PathBuf],
  skip: &[PathBuf],
  images: &[PathBuf],
) -> Result<Vec<Finding>, RelocateError> {
  let mut rewriter = Rewriter::new();
  for image in images {
    rewriter.mark_image(image.clone());
  }
  for prefix in prefixes {
    rewriter.add_prefix(prefix);
  }
  for path in skip {
    rewriter.skip(path.clone());
  }
  rewriter.scan(root, false)
}

fn is_text(content: &[u8]) -> bool {
  let sniff = &content[..content.len().min(SNIFF_LEN)];
  !sniff.contains(&0) && std::str::from_utf8(content).is_ok()
}

/// Length of the path tail starting at `from`.
fn token_len(content: &[u8], from: usize, binary: bool) -> usize {
  content
    .get(from..)
    .unwrap_or_default()
    .iter()
    .take_while(|&&b| !is_terminator(b, binary))
    .count()
}

fn is_terminator(b: u8, binary: bool) -> bool {
  matches!(
    b,
    0 | b'\n' | b'\r' | b'\t' | b' ' | b'"' | b'\'' | b'`' | b',' | b';' | b':' | b'<' | b'>' | b'(' | b')' | b'[' | b']'
  ) || (binary && !(0x20..0x7f).contains(&b))
}
