//! Claude Code session provider.
//!
//! On-disk layout: one directory per project under `~/.claude/projects/`,
//! named by dash-encoding the project path, holding append-only JSONL event
//! logs. Every event carries a session id, a parent/child uuid chain, and an
//! embedded working directory. Files with the reserved `agent-` prefix are
//! sub-agent transcripts and excluded everywhere, including cache
//! fingerprints.
//!
//! A thread can be resumed under a new session id while sharing lineage, so
//! sessions are grouped by the uuid of their first parentless user message
//! and only the most recent session per group is surfaced.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{SessionProvider, VendorRoots};
use crate::cache::SessionCache;
use crate::cache::session_cache::mtime_of;
use crate::models::project::display_name_from_path;
use crate::models::{Message, RelocationReport, SessionMeta, Vendor};
use crate::utils::paths::is_session_data_file;
use crate::utils::{encode_claude_path, parse_timestamp, truncate_summary, write_atomic};

/// User-role messages starting with any of these are injected command or
/// system traffic, not something the user typed.
const SYSTEM_PREFIXES: &[&str] = &[
    "<command-name>",
    "<command-message>",
    "<command-args>",
    "<local-command-stdout>",
    "<system-reminder>",
    "Caveat:",
    "This session is being continued from a previous",
    "Invalid API key",
    "Warmup",
];

/// When a project directory carries several distinct cwd values, the most
/// recent one wins only if it holds at least this share of the top count;
/// otherwise the most frequent wins. Undocumented heuristic kept from the
/// vendor's observed behavior; tunable.
const RECENT_CWD_MIN_RATIO: f64 = 0.25;

pub struct ClaudeProvider {
    projects_dir: PathBuf,
    /// Resolved project path -> encoded directory, filled during discovery.
    path_to_dir: HashMap<String, PathBuf>,
}

impl ClaudeProvider {
    pub fn new(roots: &VendorRoots) -> Self {
        Self { projects_dir: roots.claude_projects.clone(), path_to_dir: HashMap::new() }
    }

    fn find_project_dir(&mut self, project_path: &str, cache: &mut SessionCache) -> Option<PathBuf> {
        if let Some(dir) = self.path_to_dir.get(project_path) {
            return Some(dir.clone());
        }
        for (entry_name, entry_path) in project_dirs(&self.projects_dir) {
            let resolved = resolve_with_cache(&entry_name, &entry_path, cache);
            self.path_to_dir.insert(resolved.clone(), entry_path.clone());
            if resolved == project_path {
                return Some(entry_path);
            }
        }
        None
    }
}

impl SessionProvider for ClaudeProvider {
    fn vendor(&self) -> Vendor {
        Vendor::Claude
    }

    fn discover_projects(&mut self, cache: &mut SessionCache) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for (entry_name, entry_path) in project_dirs(&self.projects_dir) {
            let resolved = resolve_with_cache(&entry_name, &entry_path, cache);
            self.path_to_dir.insert(resolved.clone(), entry_path);
            let display = display_name_from_path(&resolved);
            out.push((resolved, display));
        }
        out
    }

    fn sessions(&mut self, project_path: &str, cache: &mut SessionCache) -> Vec<SessionMeta> {
        let Some(project_dir) = self.find_project_dir(project_path, cache) else {
            return Vec::new();
        };
        if let Some(cached) = cache.get_sessions_for_dir(&project_dir) {
            return cached;
        }
        let sessions = parse_sessions(&project_dir, project_path);
        cache.put_sessions_for_dir(&project_dir, &sessions);
        sessions
    }

    fn messages(&self, session: &SessionMeta) -> Vec<Message> {
        let Some(source) = &session.source_path else {
            return Vec::new();
        };

        // source_path is the project directory: a session's events can span
        // several files when a thread was resumed.
        let files = if source.is_dir() { session_files(source) } else { vec![source.clone()] };

        let mut messages = Vec::new();
        let mut tool_names: HashMap<String, String> = HashMap::new();

        for file in files {
            let Ok(f) = fs::File::open(&file) else { continue };
            for line in BufReader::new(f).lines().map_while(|l| l.ok()) {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let Ok(entry) = serde_json::from_str::<Value>(line) else { continue };
                if entry.get("sessionId").and_then(Value::as_str) != Some(session.id.as_str()) {
                    continue;
                }
                let Some(msg) = entry.get("message") else { continue };
                let role = msg.get("role").and_then(Value::as_str).unwrap_or("");
                let ts = entry.get("timestamp").and_then(parse_timestamp);
                let Some(content) = msg.get("content") else { continue };
                push_content_messages(&mut messages, role, content, ts, &mut tool_names);
            }
        }

        // Stable sort keeps input order for equal timestamps.
        messages.sort_by_key(|m| m.timestamp.unwrap_or(DateTime::<Utc>::MIN_UTC));
        messages
    }

    fn delete_session(&self, session: &SessionMeta) -> Result<()> {
        let Some(source) = &session.source_path else {
            return Ok(());
        };
        if !source.is_dir() {
            return Ok(());
        }

        for file in session_files(source) {
            let text = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read session file: {}", file.display()))?;

            let mut kept: Vec<&str> = Vec::new();
            let mut removed_any = false;
            for line in text.lines() {
                let trimmed = line.trim();
                if !trimmed.is_empty()
                    && let Ok(entry) = serde_json::from_str::<Value>(trimmed)
                    && entry.get("sessionId").and_then(Value::as_str) == Some(session.id.as_str())
                {
                    removed_any = true;
                    continue;
                }
                kept.push(line);
            }

            if !removed_any {
                continue;
            }

            if kept.iter().all(|l| l.trim().is_empty()) {
                fs::remove_file(&file).with_context(|| {
                    format!("Failed to remove emptied session file: {}", file.display())
                })?;
            } else {
                let mut contents = kept.join("\n");
                contents.push('\n');
                write_atomic(&file, &contents)?;
            }
        }

        Ok(())
    }

    fn relocate(&mut self, old_path: &str, new_path: &str) -> RelocationReport {
        let old_dir = self.projects_dir.join(encode_claude_path(old_path));
        let new_dir = self.projects_dir.join(encode_claude_path(new_path));

        let mut report = RelocationReport::ok(Vendor::Claude);

        let target_dir = if old_dir.is_dir() {
            if new_dir.exists() {
                return RelocationReport::failed(
                    Vendor::Claude,
                    format!("Target project directory already exists: {}", new_dir.display()),
                );
            }
            if let Err(e) = fs::rename(&old_dir, &new_dir) {
                return RelocationReport::failed(
                    Vendor::Claude,
                    format!("Failed to rename project directory: {}", e),
                );
            }
            report.dirs_renamed = 1;
            new_dir
        } else if new_dir.is_dir() {
            // Metadata-only: the encoded directory was renamed externally.
            new_dir
        } else {
            return report;
        };

        for file in session_files(&target_dir) {
            match rewrite_cwd_in_file(&file, old_path, new_path) {
                Ok(true) => report.files_rewritten += 1,
                Ok(false) => {}
                Err(e) => {
                    report.success = false;
                    report.error =
                        Some(format!("Failed updating session file {}: {}", file.display(), e));
                    return report;
                }
            }
        }

        self.path_to_dir.remove(old_path);
        self.path_to_dir.insert(new_path.to_string(), target_dir);
        report
    }

    fn dry_run_relocate(&self, old_path: &str, new_path: &str) -> RelocationReport {
        let old_dir = self.projects_dir.join(encode_claude_path(old_path));
        let new_dir = self.projects_dir.join(encode_claude_path(new_path));

        if old_dir.is_dir() && new_dir.exists() {
            return RelocationReport::failed(
                Vendor::Claude,
                format!("Target project directory already exists: {}", new_dir.display()),
            );
        }

        let mut report = RelocationReport::ok(Vendor::Claude);
        report.dirs_renamed = usize::from(old_dir.is_dir());

        let scan_dir = if old_dir.is_dir() {
            Some(old_dir)
        } else if new_dir.is_dir() {
            Some(new_dir)
        } else {
            None
        };

        if let Some(dir) = scan_dir {
            for file in session_files(&dir) {
                if file_mentions_cwd(&file, old_path) {
                    report.files_rewritten += 1;
                }
            }
        }

        report
    }
}

/// Encoded project directories under the projects root, sorted by name.
fn project_dirs(projects_dir: &Path) -> Vec<(String, PathBuf)> {
    let Ok(read) = fs::read_dir(projects_dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<(String, PathBuf)> = read
        .flatten()
        .filter(|e| e.path().is_dir())
        .map(|e| (e.file_name().to_string_lossy().into_owned(), e.path()))
        .collect();
    dirs.sort_by(|a, b| a.0.cmp(&b.0));
    dirs
}

/// Sorted session data files in a project directory (reserved-prefix files
/// excluded).
fn session_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(read) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = read
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name().is_some_and(|n| is_session_data_file(&n.to_string_lossy()))
        })
        .collect();
    files.sort();
    files
}

fn resolve_with_cache(encoded_name: &str, dir: &Path, cache: &mut SessionCache) -> String {
    let dir_mtime = fs::metadata(dir).ok().and_then(|m| mtime_of(&m));
    if let Some(mtime) = dir_mtime
        && let Some(cached) = cache.resolved_project_path(encoded_name, mtime)
    {
        return cached;
    }
    let resolved = resolve_project_path(encoded_name, dir);
    if let Some(mtime) = dir_mtime {
        cache.record_project_path(encoded_name, &resolved, mtime);
    }
    resolved
}

/// Recover the true project path from the cwd fields embedded in the
/// directory's session files. The encoding is lossy (dashes are ambiguous),
/// so the naive decode is only a last resort.
fn resolve_project_path(encoded_name: &str, dir: &Path) -> String {
    let mut cwd_counts: HashMap<String, usize> = HashMap::new();
    let mut latest: Option<(DateTime<Utc>, String)> = None;

    for file in session_files(dir) {
        let Ok(f) = fs::File::open(&file) else { continue };
        for line in BufReader::new(f).lines().map_while(|l| l.ok()) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(entry) = serde_json::from_str::<Value>(line) else { continue };
            let Some(cwd) = entry.get("cwd").and_then(Value::as_str) else { continue };
            *cwd_counts.entry(cwd.to_string()).or_insert(0) += 1;
            if let Some(ts) = entry.get("timestamp").and_then(parse_timestamp)
                && latest.as_ref().is_none_or(|(latest_ts, _)| ts > *latest_ts)
            {
                latest = Some((ts, cwd.to_string()));
            }
        }
    }

    if cwd_counts.is_empty() {
        return encoded_name.replace('-', "/");
    }
    if cwd_counts.len() == 1 {
        return cwd_counts.into_keys().next().unwrap_or_default();
    }

    let max_count = cwd_counts.values().copied().max().unwrap_or(0);
    if let Some((_, recent_cwd)) = latest
        && cwd_counts.get(&recent_cwd).copied().unwrap_or(0) as f64
            >= max_count as f64 * RECENT_CWD_MIN_RATIO
    {
        return recent_cwd;
    }

    // Most frequent, ties broken lexicographically for determinism.
    let mut entries: Vec<(String, usize)> = cwd_counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.into_iter().next().map(|(cwd, _)| cwd).unwrap_or_default()
}

#[derive(Default)]
struct SessionDraft {
    summary: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    start_timestamp: Option<DateTime<Utc>>,
    message_count: usize,
    model: Option<String>,
    last_user_message: Option<String>,
}

/// Parse every session file of a project directory into surfaced sessions.
fn parse_sessions(project_dir: &Path, project_path: &str) -> Vec<SessionMeta> {
    let mut drafts: HashMap<String, SessionDraft> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    // session id -> uuid of its first parentless user message (thread root).
    let mut thread_roots: HashMap<String, String> = HashMap::new();
    // leafUuid -> summary text for summary records carrying no session id.
    let mut pending_summaries: HashMap<String, String> = HashMap::new();

    for file in session_files(project_dir) {
        let Ok(f) = fs::File::open(&file) else { continue };
        for line in BufReader::new(f).lines().map_while(|l| l.ok()) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(entry) = serde_json::from_str::<Value>(line) else { continue };
            let entry_type = entry.get("type").and_then(Value::as_str).unwrap_or("");

            if entry_type == "summary"
                && entry.get("sessionId").and_then(Value::as_str).is_none()
            {
                if let (Some(leaf), Some(summary)) = (
                    entry.get("leafUuid").and_then(Value::as_str),
                    entry.get("summary").and_then(Value::as_str),
                ) {
                    pending_summaries.insert(leaf.to_string(), summary.to_string());
                }
                continue;
            }

            let Some(session_id) = entry.get("sessionId").and_then(Value::as_str) else {
                continue;
            };
            let draft = match drafts.entry(session_id.to_string()) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => {
                    order.push(session_id.to_string());
                    e.insert(SessionDraft::default())
                }
            };

            if let Some(ts) = entry.get("timestamp").and_then(parse_timestamp) {
                if draft.timestamp.is_none_or(|t| ts > t) {
                    draft.timestamp = Some(ts);
                }
                if draft.start_timestamp.is_none_or(|t| ts < t) {
                    draft.start_timestamp = Some(ts);
                }
            }

            // Summary records address a message by uuid; the session inherits
            // the summary through the backward parent link.
            if draft.summary.is_none()
                && let Some(parent) = entry.get("parentUuid").and_then(Value::as_str)
                && let Some(summary) = pending_summaries.get(parent)
            {
                draft.summary = Some(summary.clone());
            }
            if entry_type == "summary"
                && let Some(summary) = entry.get("summary").and_then(Value::as_str)
            {
                draft.summary = Some(summary.to_string());
            }

            let Some(msg) = entry.get("message") else { continue };
            let role = msg.get("role").and_then(Value::as_str).unwrap_or("");
            draft.message_count += 1;

            if role == "assistant"
                && let Some(model) = msg.get("model").and_then(Value::as_str)
            {
                draft.model = Some(model.to_string());
            }

            let parent_is_null = entry.get("parentUuid").is_none_or(Value::is_null);
            if role == "user"
                && parent_is_null
                && let Some(uuid) = entry.get("uuid").and_then(Value::as_str)
            {
                thread_roots.insert(session_id.to_string(), uuid.to_string());
            }

            if role == "user"
                && let Some(content) = msg.get("content")
            {
                let text = extract_text(content);
                if !text.is_empty() && !is_system_message(&text) {
                    draft.last_user_message = Some(text);
                }
            }
        }
    }

    let surfaced = fold_resumed_sessions(&order, &thread_roots, &drafts);

    let mut result = Vec::new();
    for session_id in &order {
        if !surfaced.contains(session_id.as_str()) {
            continue;
        }
        let draft = &drafts[session_id];
        let summary = match &draft.summary {
            Some(s) => s.clone(),
            None => match &draft.last_user_message {
                Some(text) => truncate_summary(text),
                None => "New Session".to_string(),
            },
        };
        // Sessions whose summary is a raw JSON object are internal noise.
        if summary.starts_with("{ \"") {
            continue;
        }
        result.push(SessionMeta {
            id: session_id.clone(),
            project_path: project_path.to_string(),
            vendor: Vendor::Claude,
            summary,
            timestamp: draft.timestamp.unwrap_or_else(Utc::now),
            start_timestamp: draft.start_timestamp,
            message_count: draft.message_count,
            model: draft.model.clone(),
            source_path: Some(project_dir.to_path_buf()),
        });
    }

    result.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    result
}

/// Collapse sessions sharing a thread root to the most recent one; sessions
/// with no thread root always surface.
fn fold_resumed_sessions<'a>(
    order: &'a [String],
    thread_roots: &HashMap<String, String>,
    drafts: &HashMap<String, SessionDraft>,
) -> HashSet<&'a str> {
    let mut groups: HashMap<&str, Vec<&'a str>> = HashMap::new();
    for session_id in order {
        match thread_roots.get(session_id) {
            Some(root) => groups.entry(root.as_str()).or_default().push(session_id),
            None => {}
        }
    }

    let mut surfaced: HashSet<&'a str> = HashSet::new();
    for members in groups.values() {
        let mut best: Option<&str> = None;
        for &sid in members {
            let ts = drafts[sid].timestamp.unwrap_or(DateTime::<Utc>::MIN_UTC);
            let best_ts = best
                .map(|b| drafts[b].timestamp.unwrap_or(DateTime::<Utc>::MIN_UTC))
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            if best.is_none() || ts > best_ts {
                best = Some(sid);
            }
        }
        if let Some(sid) = best {
            surfaced.insert(sid);
        }
    }
    for session_id in order {
        if !thread_roots.contains_key(session_id) {
            surfaced.insert(session_id);
        }
    }
    surfaced
}

/// Extract plain text from a string or `[{type: "text", text: ...}]` array.
fn extract_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let parts: Vec<&str> = items
                .iter()
                .filter(|i| i.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|i| i.get("text").and_then(Value::as_str))
                .collect();
            parts.join("\n")
        }
        _ => String::new(),
    }
}

fn is_system_message(text: &str) -> bool {
    text.is_empty() || SYSTEM_PREFIXES.iter().any(|p| text.starts_with(p))
}

/// Emit normalized messages for one event's content.
fn push_content_messages(
    messages: &mut Vec<Message>,
    role: &str,
    content: &Value,
    ts: Option<DateTime<Utc>>,
    tool_names: &mut HashMap<String, String>,
) {
    match content {
        Value::String(text) => {
            if text.trim().is_empty() {
                return;
            }
            let mut m = Message::text(role, text.clone());
            m.timestamp = ts;
            m.is_system = role == "user" && is_system_message(text);
            messages.push(m);
        }
        Value::Array(blocks) => {
            for block in blocks {
                let Some(block_type) = block.get("type").and_then(Value::as_str) else {
                    continue;
                };
                match block_type {
                    "text" => {
                        let text = block.get("text").and_then(Value::as_str).unwrap_or("");
                        if text.trim().is_empty() {
                            continue;
                        }
                        let mut m = Message::text(role, text);
                        m.timestamp = ts;
                        m.is_system = role == "user" && is_system_message(text);
                        messages.push(m);
                    }
                    "thinking" => {
                        let text = block.get("thinking").and_then(Value::as_str).unwrap_or("");
                        if text.trim().is_empty() {
                            continue;
                        }
                        let mut m = Message::thinking(text);
                        m.timestamp = ts;
                        messages.push(m);
                    }
                    "tool_use" => {
                        let name = block.get("name").and_then(Value::as_str).unwrap_or("");
                        if let Some(id) = block.get("id").and_then(Value::as_str)
                            && !name.is_empty()
                        {
                            tool_names.insert(id.to_string(), name.to_string());
                        }
                        let input = block
                            .get("input")
                            .map(|i| serde_json::to_string_pretty(i).unwrap_or_default())
                            .unwrap_or_default();
                        let mut m = Message::tool_use(name, input);
                        m.timestamp = ts;
                        messages.push(m);
                    }
                    "tool_result" => {
                        let id = block.get("tool_use_id").and_then(Value::as_str).unwrap_or("");
                        let name = tool_names.get(id).cloned().unwrap_or_default();
                        let output = block.get("content").map(extract_result_text).unwrap_or_default();
                        let mut m = Message::tool_result(name, output);
                        m.timestamp = ts;
                        messages.push(m);
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

/// Tool results carry either a plain string or an array of text blocks.
fn extract_result_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(_) => extract_text(content),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Check whether any record in the file embeds the old path as its cwd.
/// Mirrors [`rewrite_cwd_in_file`] so dry-run counts are truthful.
fn file_mentions_cwd(file: &Path, old_path: &str) -> bool {
    let Ok(f) = fs::File::open(file) else {
        return false;
    };
    for line in BufReader::new(f).lines().map_while(|l| l.ok()) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Ok(entry) = serde_json::from_str::<Value>(line)
            && entry.get("cwd").and_then(Value::as_str) == Some(old_path)
        {
            return true;
        }
    }
    false
}

/// Structurally rewrite exact cwd matches in one JSONL file. Returns whether
/// the file was modified.
fn rewrite_cwd_in_file(file: &Path, old_path: &str, new_path: &str) -> Result<bool> {
    let text = fs::read_to_string(file)
        .with_context(|| format!("Failed to read session file: {}", file.display()))?;

    let mut output: Vec<String> = Vec::new();
    let mut modified = false;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            output.push(line.to_string());
            continue;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(mut entry) => {
                if entry.get("cwd").and_then(Value::as_str) == Some(old_path) {
                    entry["cwd"] = Value::String(new_path.to_string());
                    output.push(serde_json::to_string(&entry)?);
                    modified = true;
                } else {
                    output.push(line.to_string());
                }
            }
            Err(_) => output.push(line.to_string()),
        }
    }

    if !modified {
        return Ok(false);
    }
    let mut contents = output.join("\n");
    contents.push('\n');
    write_atomic(file, &contents)?;
    Ok(true)
}
