//! Cross-vendor discovery: one merged project and session view.

use std::collections::{BTreeMap, HashMap};

use crate::cache::SessionCache;
use crate::models::{Project, SessionMeta};
use crate::providers::VendorRoots;

/// Discover every project and session across all vendors, merged by project
/// path.
///
/// A vendor whose tree is missing or unreadable contributes nothing; it
/// never hides the other vendors' data. Projects carry the union of vendors
/// that know them, the total session count, and the latest activity across
/// vendors. Session lists come back newest first.
pub fn discover_all(
    roots: &VendorRoots,
    cache: &mut SessionCache,
) -> (BTreeMap<String, Project>, HashMap<String, Vec<SessionMeta>>) {
    let mut projects: BTreeMap<String, Project> = BTreeMap::new();
    let mut sessions: HashMap<String, Vec<SessionMeta>> = HashMap::new();

    for mut provider in roots.providers() {
        for (project_path, display_name) in provider.discover_projects(cache) {
            let project = projects
                .entry(project_path.clone())
                .or_insert_with(|| Project::new(&project_path, &display_name));

            let found = provider.sessions(&project_path, cache);
            if found.is_empty() {
                continue;
            }

            project.vendors.insert(provider.vendor());
            for s in &found {
                if project.latest_activity.is_none_or(|latest| s.timestamp > latest) {
                    project.latest_activity = Some(s.timestamp);
                }
            }
            let merged = sessions.entry(project_path).or_default();
            merged.extend(found);
            project.session_count = merged.len();
        }
    }

    for list in sessions.values_mut() {
        list.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    }

    cache.save();
    (projects, sessions)
}
