//! Utility functions for string handling, naming, and file system checks.
//!
//! Helpers used across the pipeline:
//! - String truncation for log-safe previews of model responses
//! - JSON error classification for detecting truncated model output
//! - Slug generation for filenames and per-trend directories
//! - Output directory validation before any slow work starts

use chrono::Local;
use std::error::Error;
use std::fs as stdfs;
use tokio::fs;
use tracing::{info, instrument};

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to `max` characters with an ellipsis and
/// byte count indicator appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}…(+{} bytes)", &s[..max], s.len() - max)
    }
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
///
/// When a model response is cut off (e.g. by an output token limit), the
/// resulting JSON fails to parse with an EOF error. Distillation uses this
/// to decide whether a single re-ask is worth it.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// Convert a trend term into a directory-safe slug.
///
/// Lowercases the term, maps every non-alphanumeric run to a single
/// underscore, and trims leading/trailing underscores. Used for the
/// per-trend visuals directories.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(term_slug("Taylor Swift"), "taylor_swift");
/// assert_eq!(term_slug(" NBA finals!! "), "nba_finals");
/// ```
pub fn term_slug(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    let mut last_was_sep = true;
    for c in term.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Local timestamp slug for output filenames, `YYYYmmdd_HHMMSS`.
pub fn timestamp_slug() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if it doesn't exist, then performs a write test
/// by creating and immediately deleting a probe file.
///
/// # Errors
///
/// Returns an error if:
/// - The directory cannot be created
/// - The directory is not writable (permission denied, read-only filesystem, etc.)
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> Result<(), Box<dyn Error>> {
    if let Err(e) = fs::create_dir_all(path).await {
        return Err(Box::new(e));
    }
    // Try a small sync write using std fs (simpler error surface)
    let probe_path = format!("{}/..__probe_write__", path.trim_end_matches('/'));
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            info!("Output directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}
