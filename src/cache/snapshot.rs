//! Merged index snapshot for instant cold start.
//!
//! Coarser than the session cache: the fully-discovered project/session view
//! is written after a discovery pass so the next launch can display it
//! immediately while a fresh discovery runs in the background.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::INDEX_FILE;
use crate::models::{Project, SessionMeta};
use crate::utils::write_atomic;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub refreshed_at: DateTime<Utc>,
    pub projects: BTreeMap<String, Project>,
    pub sessions: HashMap<String, Vec<SessionMeta>>,
}

/// Load the snapshot, treating absence or corruption as "no snapshot".
pub fn load_snapshot(cache_dir: &Path) -> Option<IndexSnapshot> {
    let text = fs::read_to_string(cache_dir.join(INDEX_FILE)).ok()?;
    serde_json::from_str(&text).ok()
}

/// Persist the snapshot atomically.
pub fn save_snapshot(cache_dir: &Path, snapshot: &IndexSnapshot) -> Result<()> {
    fs::create_dir_all(cache_dir)
        .with_context(|| format!("Failed to create cache directory: {}", cache_dir.display()))?;
    let json = serde_json::to_string(snapshot).context("Failed to serialize index snapshot")?;
    write_atomic(&cache_dir.join(INDEX_FILE), &json)
}
