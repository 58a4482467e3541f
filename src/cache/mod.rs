//! Content cache: skip re-parsing vendor data that has not changed.
//!
//! Three on-disk artifacts live in the user-scoped cache directory, all plain
//! JSON. Corruption or absence of any of them degrades to "treat as empty";
//! none is ever a source of truth.
//!
//! - `sessions.json` - parsed sessions keyed by source file (mtime+size
//!   fingerprint) or source directory (file-set fingerprint), see
//!   [`SessionCache`]
//! - `project_paths.json` - encoded Claude directory name -> resolved project
//!   path, guarded by the directory's mtime; path resolution scans every line
//!   of every session file and must not repeat when nothing changed
//! - `index.json` - merged project/session snapshot for instant cold start,
//!   see [`snapshot`]

pub mod session_cache;
pub mod snapshot;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub use session_cache::SessionCache;
pub use snapshot::{IndexSnapshot, load_snapshot, save_snapshot};

pub(crate) const SESSIONS_FILE: &str = "sessions.json";
pub(crate) const PROJECT_PATHS_FILE: &str = "project_paths.json";
pub(crate) const INDEX_FILE: &str = "index.json";

/// Platform cache directory for this tool (`~/.cache/sesh` on Linux).
pub fn default_cache_dir() -> Result<PathBuf> {
    let base = dirs::cache_dir().context("Failed to get platform cache directory")?;
    Ok(base.join("sesh"))
}

/// Delete every cache artifact. Used after a relocation, when all cached
/// paths are stale by construction. Missing files are fine.
pub fn invalidate_all(cache_dir: &Path) {
    for name in [SESSIONS_FILE, PROJECT_PATHS_FILE, INDEX_FILE] {
        let path = cache_dir.join(name);
        if let Err(e) = fs::remove_file(&path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            eprintln!("Warning: Failed to remove cache file {}: {}", path.display(), e);
        }
    }
}
