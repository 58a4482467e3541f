//! In-memory session cache with fingerprint-guarded lookups.
//!
//! The whole cache loads once at startup, mutates in process, and persists as
//! a flat snapshot on [`SessionCache::save`]. Persistence failures are
//! swallowed: the cache is an optimization, never a source of truth.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use super::{PROJECT_PATHS_FILE, SESSIONS_FILE};
use crate::models::SessionMeta;
use crate::utils::paths::is_session_data_file;
use crate::utils::write_atomic;

/// (seconds, nanoseconds) since the epoch for a file's modification time.
pub type Mtime = (i64, u32);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileEntry {
    mtime_secs: i64,
    mtime_nanos: u32,
    size: u64,
    sessions: Vec<SessionMeta>,
}

/// Fingerprint line for one member file of a cached directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct FileStamp {
    name: String,
    mtime_secs: i64,
    mtime_nanos: u32,
    size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DirEntry {
    files: Vec<FileStamp>,
    sessions: Vec<SessionMeta>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CacheData {
    #[serde(default)]
    files: HashMap<String, FileEntry>,
    #[serde(default)]
    dirs: HashMap<String, DirEntry>,
}

/// A resolved Claude project path, valid while the encoded directory's mtime
/// is unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedDir {
    pub path: String,
    pub mtime_secs: i64,
    pub mtime_nanos: u32,
}

/// Fingerprint-keyed cache of parsed sessions plus the path-resolution map.
///
/// Callers must serialize their own access to one instance; the cache does no
/// internal locking (single interactive user assumed).
pub struct SessionCache {
    cache_dir: Option<PathBuf>,
    data: CacheData,
    project_paths: HashMap<String, ResolvedDir>,
}

impl SessionCache {
    /// Load the cache from `cache_dir`, treating missing or corrupt files as
    /// empty.
    pub fn load(cache_dir: &Path) -> Self {
        let data = read_json(&cache_dir.join(SESSIONS_FILE)).unwrap_or_default();
        let project_paths = read_json(&cache_dir.join(PROJECT_PATHS_FILE)).unwrap_or_default();
        Self { cache_dir: Some(cache_dir.to_path_buf()), data, project_paths }
    }

    /// A cache that never persists. Useful when the caller wants a single
    /// discovery pass with no disk side effects.
    pub fn in_memory() -> Self {
        Self { cache_dir: None, data: CacheData::default(), project_paths: HashMap::new() }
    }

    /// Persist the cache. Best-effort: failures are reported to stderr and
    /// otherwise ignored.
    pub fn save(&self) {
        let Some(dir) = &self.cache_dir else { return };
        if let Err(e) = fs::create_dir_all(dir) {
            eprintln!("Warning: Failed to create cache directory {}: {}", dir.display(), e);
            return;
        }
        for (name, payload) in [
            (SESSIONS_FILE, serde_json::to_string(&self.data)),
            (PROJECT_PATHS_FILE, serde_json::to_string(&self.project_paths)),
        ] {
            match payload {
                Ok(json) => {
                    if let Err(e) = write_atomic(&dir.join(name), &json) {
                        eprintln!("Warning: Failed to save cache file {}: {}", name, e);
                    }
                }
                Err(e) => eprintln!("Warning: Failed to serialize cache file {}: {}", name, e),
            }
        }
    }

    /// Cached sessions for a single source file, if its mtime and size are
    /// both unchanged.
    pub fn get_sessions(&self, file_path: &Path) -> Option<Vec<SessionMeta>> {
        let entry = self.data.files.get(&key_for(file_path))?;
        let meta = fs::metadata(file_path).ok()?;
        let (mtime_secs, mtime_nanos) = mtime_of(&meta)?;
        if entry.mtime_secs != mtime_secs
            || entry.mtime_nanos != mtime_nanos
            || entry.size != meta.len()
        {
            return None;
        }
        Some(entry.sessions.clone())
    }

    /// Record sessions parsed from one source file.
    pub fn put_sessions(&mut self, file_path: &Path, sessions: &[SessionMeta]) {
        let Ok(meta) = fs::metadata(file_path) else { return };
        let Some((mtime_secs, mtime_nanos)) = mtime_of(&meta) else { return };
        self.data.files.insert(
            key_for(file_path),
            FileEntry { mtime_secs, mtime_nanos, size: meta.len(), sessions: sessions.to_vec() },
        );
    }

    /// Cached sessions for a whole directory, if the sorted
    /// (name, mtime, size) set of its data files is unchanged. Any membership
    /// or metadata drift invalidates.
    pub fn get_sessions_for_dir(&self, dir: &Path) -> Option<Vec<SessionMeta>> {
        let entry = self.data.dirs.get(&key_for(dir))?;
        let current = dir_stamps(dir)?;
        if entry.files != current {
            return None;
        }
        Some(entry.sessions.clone())
    }

    /// Record sessions parsed from a whole directory.
    pub fn put_sessions_for_dir(&mut self, dir: &Path, sessions: &[SessionMeta]) {
        let Some(files) = dir_stamps(dir) else { return };
        self.data.dirs.insert(key_for(dir), DirEntry { files, sessions: sessions.to_vec() });
    }

    /// Resolved project path for an encoded directory name, if the directory
    /// mtime matches the recorded one.
    pub fn resolved_project_path(&self, encoded_name: &str, dir_mtime: Mtime) -> Option<String> {
        let entry = self.project_paths.get(encoded_name)?;
        if (entry.mtime_secs, entry.mtime_nanos) != dir_mtime {
            return None;
        }
        Some(entry.path.clone())
    }

    /// Record a resolved project path for an encoded directory name.
    pub fn record_project_path(&mut self, encoded_name: &str, path: &str, dir_mtime: Mtime) {
        self.project_paths.insert(
            encoded_name.to_string(),
            ResolvedDir { path: path.to_string(), mtime_secs: dir_mtime.0, mtime_nanos: dir_mtime.1 },
        );
    }
}

fn key_for(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
    let text = fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

/// Modification time of a file as (secs, nanos). None for pre-epoch mtimes.
pub fn mtime_of(meta: &fs::Metadata) -> Option<Mtime> {
    let modified = meta.modified().ok()?;
    let dur = modified.duration_since(SystemTime::UNIX_EPOCH).ok()?;
    Some((dur.as_secs() as i64, dur.subsec_nanos()))
}

/// Sorted (name, mtime, size) fingerprint over a directory's data files,
/// excluding reserved-prefix files. None when the directory is unreadable.
fn dir_stamps(dir: &Path) -> Option<Vec<FileStamp>> {
    let mut stamps = Vec::new();
    for entry in fs::read_dir(dir).ok()?.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_session_data_file(&name) {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        let Some((mtime_secs, mtime_nanos)) = mtime_of(&meta) else { continue };
        stamps.push(FileStamp { name, mtime_secs, mtime_nanos, size: meta.len() });
    }
    stamps.sort_by(|a, b| a.name.cmp(&b.name));
    Some(stamps)
}
