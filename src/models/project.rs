use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Vendor;

/// One project directory, aggregated across every vendor that has sessions
/// for it. Rebuilt from scratch on each discovery pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Absolute path of the project on disk.
    pub path: String,
    pub display_name: String,
    pub vendors: BTreeSet<Vendor>,
    pub session_count: usize,
    /// Max session timestamp across all vendors, recomputed on every add.
    pub latest_activity: Option<DateTime<Utc>>,
}

impl Project {
    pub fn new(path: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            display_name: display_name.into(),
            vendors: BTreeSet::new(),
            session_count: 0,
            latest_activity: None,
        }
    }
}

/// Short display name for a project path: its last component.
pub fn display_name_from_path(project_path: &str) -> String {
    project_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(project_path)
        .to_string()
}
