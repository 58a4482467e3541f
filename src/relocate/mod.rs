//! Project relocation: move a project on disk and update every vendor's
//! stored references to its path.
//!
//! Vendors are updated independently; one vendor's conflict or failure never
//! blocks the others, and the per-vendor outcome comes back as a
//! [`RelocationReport`] list in stable vendor order. After any real move the
//! whole cache is invalidated, since every cached path is stale by
//! construction.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::cache::invalidate_all;
use crate::models::RelocationReport;
use crate::providers::VendorRoots;

/// Move a project from `old_path` to `new_path`.
///
/// With `full_move` the real project directory is renamed first; a
/// metadata-only run (`full_move == false`) assumes the directory already
/// moved and only rewrites vendor data. With `dry_run` nothing is mutated
/// and the reports carry the counts an execution would produce.
pub fn relocate_project(
    roots: &VendorRoots,
    cache_dir: &Path,
    old_path: &str,
    new_path: &str,
    full_move: bool,
    dry_run: bool,
) -> Result<Vec<RelocationReport>> {
    validate_paths(old_path, new_path, full_move)?;

    if dry_run {
        return Ok(roots
            .providers()
            .iter()
            .map(|p| p.dry_run_relocate(old_path, new_path))
            .collect());
    }

    if full_move {
        if let Some(parent) = Path::new(new_path).parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create parent directory: {}", parent.display())
            })?;
        }
        fs::rename(old_path, new_path)
            .with_context(|| format!("Failed moving project files: {} -> {}", old_path, new_path))?;
    }

    let mut providers = roots.providers();
    let reports: Vec<RelocationReport> =
        providers.iter_mut().map(|p| p.relocate(old_path, new_path)).collect();

    invalidate_all(cache_dir);
    Ok(reports)
}

fn validate_paths(old_path: &str, new_path: &str, full_move: bool) -> Result<()> {
    if old_path == new_path {
        bail!("Old path and new path must be different.");
    }
    let old = Path::new(old_path);
    let new = Path::new(new_path);
    if full_move {
        if !old.exists() {
            bail!("Old path does not exist: {}", old_path);
        }
        if new.exists() {
            bail!("New path already exists: {}", new_path);
        }
    } else if !new.exists() {
        bail!("New path does not exist (required for metadata-only move): {}", new_path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::models::Vendor;
    use crate::providers::test_support::roots_under;
    use crate::utils::{chats_dir_hash, encode_claude_path, encode_cursor_path};

    fn paths_under(base: &Path) -> (String, String) {
        (
            base.join("work/old-project").to_string_lossy().into_owned(),
            base.join("work/new-project").to_string_lossy().into_owned(),
        )
    }

    #[test]
    fn test_identical_paths_rejected() {
        let tmp = TempDir::new().unwrap();
        let roots = roots_under(tmp.path());
        let err = relocate_project(&roots, tmp.path(), "/a", "/a", true, false).unwrap_err();
        assert!(err.to_string().contains("must be different"));
    }

    #[test]
    fn test_full_move_requires_existing_old_path() {
        let tmp = TempDir::new().unwrap();
        let roots = roots_under(tmp.path());
        let (old, new) = paths_under(tmp.path());
        let err = relocate_project(&roots, tmp.path(), &old, &new, true, false).unwrap_err();
        assert!(err.to_string().contains("Old path does not exist"));
    }

    #[test]
    fn test_full_move_rejects_existing_new_path() {
        let tmp = TempDir::new().unwrap();
        let roots = roots_under(tmp.path());
        let (old, new) = paths_under(tmp.path());
        fs::create_dir_all(&old).unwrap();
        fs::create_dir_all(&new).unwrap();
        let err = relocate_project(&roots, tmp.path(), &old, &new, true, false).unwrap_err();
        assert!(err.to_string().contains("New path already exists"));
    }

    #[test]
    fn test_metadata_only_requires_existing_new_path() {
        let tmp = TempDir::new().unwrap();
        let roots = roots_under(tmp.path());
        let (old, new) = paths_under(tmp.path());
        let err = relocate_project(&roots, tmp.path(), &old, &new, false, false).unwrap_err();
        assert!(err.to_string().contains("metadata-only move"));
    }

    #[test]
    fn test_full_move_renames_project_directory() {
        let tmp = TempDir::new().unwrap();
        let roots = roots_under(tmp.path());
        let (old, new) = paths_under(tmp.path());
        fs::create_dir_all(&old).unwrap();
        fs::write(Path::new(&old).join("main.rs"), "fn main() {}").unwrap();

        let reports = relocate_project(&roots, tmp.path(), &old, &new, true, false).unwrap();

        assert!(!Path::new(&old).exists());
        assert!(Path::new(&new).join("main.rs").is_file());
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.success));
    }

    #[test]
    fn test_dry_run_mutates_nothing() {
        let tmp = TempDir::new().unwrap();
        let roots = roots_under(tmp.path());
        let (old, new) = paths_under(tmp.path());
        fs::create_dir_all(&old).unwrap();
        let claude_dir = roots.claude_projects.join(encode_claude_path(&old));
        fs::create_dir_all(&claude_dir).unwrap();
        fs::write(
            claude_dir.join("a.jsonl"),
            serde_json::json!({"sessionId": "s1", "cwd": old}).to_string() + "\n",
        )
        .unwrap();

        let reports = relocate_project(&roots, tmp.path(), &old, &new, true, true).unwrap();

        // The real directory and the vendor tree are untouched.
        assert!(Path::new(&old).exists());
        assert!(claude_dir.exists());
        let claude = reports.iter().find(|r| r.vendor == Vendor::Claude).unwrap();
        assert_eq!(claude.dirs_renamed, 1);
        assert_eq!(claude.files_rewritten, 1);
    }

    #[test]
    fn test_vendor_conflict_does_not_block_other_vendors() {
        let tmp = TempDir::new().unwrap();
        let roots = roots_under(tmp.path());
        let (old, new) = paths_under(tmp.path());
        fs::create_dir_all(&old).unwrap();

        // Cursor has both source and target dirs: a conflict.
        fs::create_dir_all(roots.cursor_chats.join(chats_dir_hash(&old))).unwrap();
        fs::create_dir_all(roots.cursor_chats.join(chats_dir_hash(&new))).unwrap();
        // Claude has a relocatable dir.
        let claude_dir = roots.claude_projects.join(encode_claude_path(&old));
        fs::create_dir_all(&claude_dir).unwrap();

        let reports = relocate_project(&roots, tmp.path(), &old, &new, true, false).unwrap();

        let cursor = reports.iter().find(|r| r.vendor == Vendor::Cursor).unwrap();
        assert!(!cursor.success);
        let claude = reports.iter().find(|r| r.vendor == Vendor::Claude).unwrap();
        assert!(claude.success);
        assert_eq!(claude.dirs_renamed, 1);
        assert!(roots.claude_projects.join(encode_claude_path(&new)).is_dir());
    }

    #[test]
    fn test_execute_invalidates_cache_artifacts() {
        let tmp = TempDir::new().unwrap();
        let roots = roots_under(tmp.path());
        let cache_dir = tmp.path().join("cache");
        fs::create_dir_all(&cache_dir).unwrap();
        fs::write(cache_dir.join("sessions.json"), "{}").unwrap();
        fs::write(cache_dir.join("index.json"), "{}").unwrap();

        let (old, new) = paths_under(tmp.path());
        fs::create_dir_all(&old).unwrap();
        relocate_project(&roots, &cache_dir, &old, &new, true, false).unwrap();

        assert!(!cache_dir.join("sessions.json").exists());
        assert!(!cache_dir.join("index.json").exists());
    }
}
