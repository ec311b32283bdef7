//! Terminal output for the `relopack` commands.
//!
//! Status lines go to stdout, warnings and errors to stderr. Colour is only
//! applied when the target stream supports it.

use std::time::Duration;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream};

use relopack_lib::relocate::{Finding, FindingKind};

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
}

/// Hex digits shown for snapshot and object hashes.
const SHORT_HASH_LEN: usize = 12;

pub fn truncate_hash(hash: &str) -> &str {
  hash.get(..SHORT_HASH_LEN).unwrap_or(hash)
}

pub fn format_bytes(bytes: u64) -> String {
  const UNITS: [&str; 3] = ["KB", "MB", "GB"];

  if bytes < 1024 {
    return format!("{} B", bytes);
  }
  let mut size = bytes as f64 / 1024.0;
  let mut unit = 0;
  while size >= 1024.0 && unit + 1 < UNITS.len() {
    size /= 1024.0;
    unit += 1;
  }
  format!("{:.1} {}", size, UNITS[unit])
}

pub fn format_duration(duration: Duration) -> String {
  match duration.as_secs() {
    0 => format!("{}ms", duration.subsec_millis()),
    secs @ 1..60 => format!("{}.{:02}s", secs, duration.subsec_millis() / 10),
    secs => format!("{}m {}s", secs / 60, secs % 60),
  }
}

/// `file@offset: reference`, followed by the replacement for rewritten
/// references or the category for warnings.
pub fn format_finding(finding: &Finding) -> String {
  let mut line = format!("{}@{}: {}", finding.file.display(), finding.offset, finding.reference);
  match (&finding.kind, &finding.replacement) {
    (FindingKind::Rewritten, Some(replacement)) => {
      line.push_str(&format!(" {} {}", symbols::ARROW, replacement));
    }
    (FindingKind::Rewritten, None) => {}
    (FindingKind::Warning(category), _) => line.push_str(&format!(" [{}]", category)),
  }
  line
}

pub fn print_success(message: &str) {
  let mark = symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green());
  println!("{} {}", mark, message);
}

pub fn print_info(message: &str) {
  let mark = symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue());
  println!("{} {}", mark, message);
}

pub fn print_error(message: &str) {
  let mark = symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red());
  eprintln!("{} {}", mark, message.if_supports_color(Stream::Stderr, |s| s.red()));
}

pub fn print_warning(message: &str) {
  let mark = symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow());
  eprintln!("{} {}", mark, message.if_supports_color(Stream::Stderr, |s| s.yellow()));
}

/// Indented `label: value` line under a status message.
pub fn print_stat(label: &str, value: &str) {
  println!("  {}: {}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()), value);
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize output as JSON")?;
  println!("{}", json);
  Ok(())
}
