//! JSON subcommands for programmatic access.
//!
//! Listing commands read the index snapshot written by `refresh`; only
//! `messages` touches vendor data directly, and only `move` and `refresh`
//! mutate anything.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::{Value, json};

use crate::cache::{IndexSnapshot, SessionCache, default_cache_dir, load_snapshot, save_snapshot};
use crate::discovery::discover_all;
use crate::models::{Message, SessionMeta, Vendor};
use crate::providers::VendorRoots;
use crate::relocate::relocate_project;

#[derive(Parser)]
#[command(name = "sesh")]
#[command(version = "0.1.0")]
#[command(about = "Browse and relocate AI coding assistant sessions", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Discover all projects and sessions and rebuild the index
    Refresh,
    /// List indexed projects
    Projects,
    /// List indexed sessions
    Sessions {
        /// Only sessions under this project path
        #[arg(long)]
        project: Option<String>,
        /// Only sessions from this vendor (claude, codex, cursor)
        #[arg(long)]
        vendor: Option<Vendor>,
    },
    /// Print the messages of one session
    Messages {
        project_path: String,
        session_id: String,
        /// Disambiguate when two vendors share a session id
        #[arg(long)]
        vendor: Option<Vendor>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Move a project directory and update vendor metadata
    Move {
        old_path: String,
        new_path: String,
        /// Report what would change without touching anything
        #[arg(long)]
        dry_run: bool,
        /// Skip the real directory move, only rewrite vendor metadata
        #[arg(long)]
        metadata_only: bool,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let roots = VendorRoots::from_home()?;
    let cache_dir = default_cache_dir()?;

    match cli.command {
        Commands::Refresh => refresh(&roots, &cache_dir),
        Commands::Projects => projects(&cache_dir),
        Commands::Sessions { project, vendor } => sessions(&cache_dir, project, vendor),
        Commands::Messages { project_path, session_id, vendor, offset, limit } => {
            messages(&roots, &cache_dir, &project_path, &session_id, vendor, offset, limit)
        }
        Commands::Move { old_path, new_path, dry_run, metadata_only } => {
            move_command(&roots, &cache_dir, &old_path, &new_path, dry_run, metadata_only)
        }
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("Failed to serialize output")?);
    Ok(())
}

fn require_snapshot(cache_dir: &std::path::Path) -> Result<IndexSnapshot> {
    load_snapshot(cache_dir).context("No index found. Run 'sesh refresh' first.")
}

fn refresh(roots: &VendorRoots, cache_dir: &std::path::Path) -> Result<()> {
    let mut cache = SessionCache::load(cache_dir);
    let (projects, sessions) = discover_all(roots, &mut cache);

    let total_sessions: usize = sessions.values().map(Vec::len).sum();
    let vendors: Vec<&str> = sessions
        .values()
        .flatten()
        .map(|s| s.vendor.as_str())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    let refreshed_at = Utc::now();
    save_snapshot(cache_dir, &IndexSnapshot { refreshed_at, projects: projects.clone(), sessions })?;

    print_json(&json!({
        "projects": projects.len(),
        "sessions": total_sessions,
        "vendors": vendors,
        "refreshed_at": refreshed_at.to_rfc3339(),
    }))
}

fn projects(cache_dir: &std::path::Path) -> Result<()> {
    let snapshot = require_snapshot(cache_dir)?;
    let list: Vec<&crate::models::Project> = snapshot.projects.values().collect();
    print_json(&serde_json::to_value(list)?)
}

fn sessions(
    cache_dir: &std::path::Path,
    project: Option<String>,
    vendor: Option<Vendor>,
) -> Result<()> {
    let snapshot = require_snapshot(cache_dir)?;
    let mut out: Vec<Value> = Vec::new();
    for (project_path, list) in &snapshot.sessions {
        if let Some(filter) = &project
            && project_path != filter
        {
            continue;
        }
        for s in list {
            if let Some(v) = vendor
                && s.vendor != v
            {
                continue;
            }
            out.push(session_json(s));
        }
    }
    print_json(&Value::Array(out))
}

/// Session entity for output, without the internal source path.
fn session_json(s: &SessionMeta) -> Value {
    json!({
        "id": s.id,
        "project_path": s.project_path,
        "vendor": s.vendor,
        "summary": s.summary,
        "timestamp": s.timestamp.to_rfc3339(),
        "message_count": s.message_count,
        "model": s.model,
    })
}

fn message_json(m: &Message) -> Value {
    let mut entry = json!({
        "role": m.role,
        "content": m.content,
        "kind": m.kind,
        "timestamp": m.timestamp.map(|t| t.to_rfc3339()),
    });
    if let Some(name) = &m.tool_name {
        entry["tool_name"] = json!(name);
    }
    if let Some(input) = &m.tool_input {
        entry["tool_input"] = json!(input);
    }
    if let Some(output) = &m.tool_output {
        entry["tool_output"] = json!(output);
    }
    entry
}

fn messages(
    roots: &VendorRoots,
    cache_dir: &std::path::Path,
    project_path: &str,
    session_id: &str,
    vendor: Option<Vendor>,
    offset: usize,
    limit: usize,
) -> Result<()> {
    let snapshot = require_snapshot(cache_dir)?;
    let session = snapshot
        .sessions
        .get(project_path)
        .into_iter()
        .flatten()
        .find(|s| s.id == session_id && vendor.is_none_or(|v| s.vendor == v))
        .with_context(|| {
            format!("Session '{}' not found. Run 'sesh refresh' to update the index.", session_id)
        })?;

    let providers = roots.providers();
    let provider = providers
        .iter()
        .find(|p| p.vendor() == session.vendor)
        .context("No provider for vendor")?;
    let all = provider.messages(session);

    let total = all.len();
    let page: Vec<Value> = all.iter().skip(offset).take(limit).map(message_json).collect();

    print_json(&json!({
        "total": total,
        "offset": offset,
        "limit": limit,
        "messages": page,
    }))
}

fn move_command(
    roots: &VendorRoots,
    cache_dir: &std::path::Path,
    old_path: &str,
    new_path: &str,
    dry_run: bool,
    metadata_only: bool,
) -> Result<()> {
    let reports = relocate_project(roots, cache_dir, old_path, new_path, !metadata_only, dry_run)?;
    print_json(&serde_json::to_value(&reports)?)?;
    if reports.iter().any(|r| !r.success) {
        bail!("One or more vendor updates failed");
    }
    Ok(())
}
