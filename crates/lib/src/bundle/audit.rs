use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use super::BundleError;
use crate::layout::BundleManifest;
use crate::relocate::{Finding, audit};

/// Result of auditing a published bundle.
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
  pub bundle: PathBuf,
  /// Prefixes searched for, from the bundle manifest plus any given.
  pub prefixes: Vec<PathBuf>,
  pub findings: Vec<Finding>,
}

impl AuditReport {
  pub fn warning_count(&self) -> usize {
    self.findings.iter().filter(|f| f.kind.is_warning()).count()
  }

  pub fn rewritten_count(&self) -> usize {
    self.findings.len() - self.warning_count()
  }
}

/// Scan a bundle for references to the build machine.
///
/// Warnings are advisory and never turn into an error. Reflection-only
/// findings in particular are expected in every bundle with compiled code.
/// Without a manifest the snapshot image is unknown, so every binary finding
/// is reported as external.
pub fn audit_bundle(root: &Path, extra_prefixes: &[PathBuf]) -> Result<AuditReport, BundleError> {
  let (mut prefixes, images) = match BundleManifest::read(root) {
    Ok(manifest) => (manifest.build_prefixes, vec![manifest.snapshot.file]),
    Err(e) => {
      debug!(error = %e, "no readable bundle manifest, using given prefixes only");
      (Vec::new(), Vec::new())
    }
  };
  for prefix in extra_prefixes {
    if !prefixes.contains(prefix) {
      prefixes.push(prefix.clone());
    }
  }

  let findings = audit(root, &prefixes, &[BundleManifest::relative_path()], &images)?;
  info!(bundle = %root.display(), findings = findings.len(), "audited bundle");

  Ok(AuditReport {
    bundle: root.to_path_buf(),
    prefixes,
    findings,
  })
}
