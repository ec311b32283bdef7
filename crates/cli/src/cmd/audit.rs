//! `relopack audit`: report build-machine paths left in a bundle.
//!
//! Findings are advisory; the command succeeds whenever the bundle could be
//! scanned.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;

use relopack_lib::bundle::audit_bundle;

use crate::output::{format_finding, print_info, print_json, print_stat, print_success, print_warning};

#[derive(Debug, Args)]
pub struct AuditArgs {
  /// Bundle root directory
  pub bundle: PathBuf,

  /// Additional build-machine prefix to search for (repeatable)
  #[arg(long = "prefix", value_name = "DIR")]
  pub prefixes: Vec<PathBuf>,

  /// Print the report as JSON
  #[arg(long)]
  pub json: bool,
}

pub fn cmd_audit(args: &AuditArgs, verbose: bool) -> Result<()> {
  if !args.bundle.is_dir() {
    bail!("Bundle directory not found: {}", args.bundle.display());
  }
  let root = dunce::canonicalize(&args.bundle).unwrap_or_else(|_| args.bundle.clone());

  let report = audit_bundle(&root, &args.prefixes).with_context(|| format!("Failed to audit {}", root.display()))?;

  if args.json {
    return print_json(&report);
  }

  if report.prefixes.is_empty() {
    print_info("No build prefixes recorded or given; only checking placeholders.");
  }

  let warnings = report.warning_count();
  if warnings == 0 {
    print_success(&format!("No relocatability warnings in {}", root.display()));
  } else {
    print_warning(&format!("{} relocatability warning(s) in {}", warnings, root.display()));
  }
  print_stat("Prefixes", &report.prefixes.len().to_string());
  print_stat("Placeholders", &report.rewritten_count().to_string());
  print_stat("Warnings", &warnings.to_string());

  let shown = report.findings.iter().filter(|f| verbose || f.kind.is_warning());
  let mut first = true;
  for finding in shown {
    if first {
      println!();
      first = false;
    }
    println!("  {}", format_finding(finding));
  }

  Ok(())
}
