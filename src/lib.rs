//! sesh - browse, inspect, and relocate AI coding assistant sessions
//!
//! This library aggregates locally stored conversation logs from Claude Code
//! (`~/.claude/projects/`), Codex CLI (`~/.codex/sessions/`), and Cursor
//! (`~/.cursor/` plus its workspace storage) into one merged view keyed by
//! project path. It supports:
//!
//! - Discovering projects and sessions across all three vendors
//! - Loading normalized message lists for any session
//! - Fingerprint-based caching so unchanged files are never re-parsed
//! - Relocating a project on disk and rewriting every vendor's stored
//!   references to its path
//!
//! # Example
//!
//! ```no_run
//! use sesh_core::cache::SessionCache;
//! use sesh_core::discovery::discover_all;
//! use sesh_core::providers::VendorRoots;
//!
//! let roots = VendorRoots::from_home()?;
//! let mut cache = SessionCache::in_memory();
//! let (projects, sessions) = discover_all(&roots, &mut cache);
//! println!("Found {} projects", projects.len());
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod cache;
pub mod cli;
pub mod discovery;
pub mod models;
pub mod providers;
pub mod relocate;
pub mod utils;

// Re-export commonly used types
pub use cache::SessionCache;
pub use discovery::discover_all;
pub use models::{Message, Project, RelocationReport, SessionMeta, Vendor};
pub use providers::{SessionProvider, VendorRoots};
pub use relocate::relocate_project;
