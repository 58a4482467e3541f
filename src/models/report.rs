use serde::{Deserialize, Serialize};

use super::Vendor;

/// Outcome of a project relocation for one vendor.
///
/// A failed vendor never blocks or hides another vendor's counts; the
/// orchestrator always returns one report per vendor. A best-effort scan
/// problem lands in `warning` while `success` stays true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelocationReport {
    pub vendor: Vendor,
    pub success: bool,
    pub dirs_renamed: usize,
    pub files_rewritten: usize,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub warning: Option<String>,
}

impl RelocationReport {
    pub fn ok(vendor: Vendor) -> Self {
        Self {
            vendor,
            success: true,
            dirs_renamed: 0,
            files_rewritten: 0,
            error: None,
            warning: None,
        }
    }

    pub fn failed(vendor: Vendor, error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()), ..Self::ok(vendor) }
    }
}
