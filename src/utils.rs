//! Utility functions for string manipulation and file system checks.
//!
//! - Slug generation for journal archive filenames
//! - Safe labels for debug snapshot files
//! - String truncation for log lines
//! - Output directory validation

use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fs as stdfs;
use tokio::fs;
use tracing::{info, instrument};

/// Convert a journal name to a filesystem- and URL-friendly slug.
///
/// Lowercases the text, removes special characters, and replaces runs of
/// whitespace with single hyphens.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(slugify("Journal of Political Economy"), "journal-of-political-economy");
/// ```
pub fn slugify(name: &str) -> String {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect();
    cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .trim_matches('-')
        .to_string()
}

static SAFE_LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9_-]+").expect("valid safe-label regex"));

/// Reduce an arbitrary string (usually a URL) to a filename-safe label for
/// debug snapshot artifacts.
pub fn safe_label(label: &str) -> String {
    let replaced = SAFE_LABEL_RE.replace_all(label, "_").to_string();
    if replaced.is_empty() {
        "page".to_string()
    } else {
        replaced
    }
}

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to `max` bytes with an ellipsis and byte-count
/// indicator appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…(+{} bytes)", &s[..end], s.len() - end)
    }
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if it doesn't exist, then performs a write test by
/// creating and immediately deleting a probe file.
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> Result<(), Box<dyn Error>> {
    if let Err(e) = fs::create_dir_all(path).await {
        return Err(Box::new(e));
    }
    // Small sync write using std fs (simpler error surface)
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
