use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Vendor;

/// Metadata for one conversation thread.
///
/// The id is only unique within (vendor, project_path); two vendors may reuse
/// the same id for unrelated sessions and must never be conflated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    pub project_path: String,
    pub vendor: Vendor,
    pub summary: String,
    /// Latest activity in the session; used for ordering.
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub start_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub model: Option<String>,
    /// The minimal file or directory a provider needs to re-derive messages
    /// on demand. Never points at a cache artifact.
    #[serde(default)]
    pub source_path: Option<PathBuf>,
}
