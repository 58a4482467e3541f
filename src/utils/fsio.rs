//! Atomic file replacement.
//!
//! Every rewrite of a vendor-owned or cache file goes through a same-directory
//! temp file followed by a rename, so a crash mid-write never leaves a
//! truncated file behind.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Write `contents` to `path` atomically (temp file + rename in the same
/// directory). The single-writer assumption makes a fixed temp name safe.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("Path has no file name: {}", path.display()))?;
    let tmp = path.with_file_name(format!("{}.tmp", file_name));

    fs::write(&tmp, contents)
        .with_context(|| format!("Failed to write temp file: {}", tmp.display()))?;
    if let Err(e) = fs::rename(&tmp, path) {
        // Leave no stray temp file behind on failure.
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("Failed to replace file: {}", path.display()));
    }

    Ok(())
}
