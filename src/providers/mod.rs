//! Vendor session providers.
//!
//! One capability contract, three independent implementations. Providers
//! share no mutable state: each owns its root paths and its in-process lookup
//! caches as instance fields, so two provider instances never see each
//! other's staleness.
//!
//! # Error Handling Strategy
//!
//! Parsing is best-effort with a bounded skip-and-continue policy: a
//! malformed JSON line, an unreadable database row, or a vanished file is
//! skipped at the smallest affected unit and never aborts sibling
//! enumeration. Two operations deliberately break that rule:
//!
//! - `delete_session` is destructive and propagates every failure;
//! - `relocate` reports failures structurally, per vendor, through
//!   [`RelocationReport`].

pub mod claude;
pub mod codex;
pub mod cursor;

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::cache::SessionCache;
use crate::models::{Message, RelocationReport, SessionMeta, Vendor};

pub use claude::ClaudeProvider;
pub use codex::CodexProvider;
pub use cursor::CursorProvider;

/// Capability contract implemented by every vendor provider.
pub trait SessionProvider {
    fn vendor(&self) -> Vendor;

    /// Enumerate (project_path, display_name) pairs for this vendor.
    /// Never fails; unreadable entries are skipped.
    fn discover_projects(&mut self, cache: &mut SessionCache) -> Vec<(String, String)>;

    /// Sessions for one project, newest first, consulting the cache before
    /// re-parsing.
    fn sessions(&mut self, project_path: &str, cache: &mut SessionCache) -> Vec<SessionMeta>;

    /// Load the full message list for one session on demand.
    fn messages(&self, session: &SessionMeta) -> Vec<Message>;

    /// Delete a session's stored data. Destructive: failures propagate.
    fn delete_session(&self, session: &SessionMeta) -> Result<()>;

    /// Rewrite this vendor's stored references after a project move.
    fn relocate(&mut self, old_path: &str, new_path: &str) -> RelocationReport;

    /// Report what [`SessionProvider::relocate`] would do, mutating nothing.
    /// Detection mirrors the execute path so previews are truthful.
    fn dry_run_relocate(&self, old_path: &str, new_path: &str) -> RelocationReport;
}

/// Root directories for every vendor tree, injectable for tests.
#[derive(Debug, Clone)]
pub struct VendorRoots {
    /// `~/.claude/projects`
    pub claude_projects: PathBuf,
    /// `~/.codex/sessions`
    pub codex_sessions: PathBuf,
    /// `~/.cursor/chats`
    pub cursor_chats: PathBuf,
    /// `~/.cursor/projects`
    pub cursor_projects: PathBuf,
    /// Cursor's workspace-registration directory (`workspaceStorage`).
    pub cursor_workspace_storage: PathBuf,
}

impl VendorRoots {
    /// Standard locations under the user's home directory.
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().context("Failed to determine home directory")?;
        let config = dirs::config_dir().context("Failed to determine config directory")?;
        Ok(Self {
            claude_projects: home.join(".claude").join("projects"),
            codex_sessions: home.join(".codex").join("sessions"),
            cursor_chats: home.join(".cursor").join("chats"),
            cursor_projects: home.join(".cursor").join("projects"),
            cursor_workspace_storage: config.join("Cursor").join("User").join("workspaceStorage"),
        })
    }

    /// All three providers for these roots, in stable vendor order.
    pub fn providers(&self) -> Vec<Box<dyn SessionProvider>> {
        vec![
            Box::new(ClaudeProvider::new(self)),
            Box::new(CodexProvider::new(self)),
            Box::new(CursorProvider::new(self)),
        ]
    }
}
