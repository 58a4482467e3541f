//! Codex CLI session provider.
//!
//! On-disk layout: `~/.codex/sessions/` holds date-sharded subdirectories of
//! JSONL rollout files, one session per file. Two schemas coexist: newer
//! files open with a `session_meta` record carrying the session id and cwd;
//! legacy files embed the cwd inside an environment-context XML tag in
//! message content. There is no per-project directory, so discovery walks
//! the whole tree once and indexes by cwd.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use walkdir::WalkDir;

use super::{SessionProvider, VendorRoots};
use crate::cache::SessionCache;
use crate::models::{Message, RelocationReport, SessionMeta, Vendor};
use crate::utils::paths::file_stem;
use crate::utils::{parse_timestamp, truncate_summary, write_atomic};

pub struct CodexProvider {
    sessions_dir: PathBuf,
    /// project path -> sessions, built lazily from one tree walk.
    index: Option<HashMap<String, Vec<SessionMeta>>>,
}

impl CodexProvider {
    pub fn new(roots: &VendorRoots) -> Self {
        Self { sessions_dir: roots.codex_sessions.clone(), index: None }
    }

    fn build_index(&mut self, cache: &mut SessionCache) -> &HashMap<String, Vec<SessionMeta>> {
        if self.index.is_none() {
            let mut index: HashMap<String, Vec<SessionMeta>> = HashMap::new();
            for file in session_files(&self.sessions_dir) {
                if let Some(cached) = cache.get_sessions(&file).filter(|s| !s.is_empty()) {
                    for session in cached {
                        index.entry(session.project_path.clone()).or_default().push(session);
                    }
                    continue;
                }
                if let Some(session) = parse_session_file(&file) {
                    cache.put_sessions(&file, std::slice::from_ref(&session));
                    index.entry(session.project_path.clone()).or_default().push(session);
                }
            }
            self.index = Some(index);
        }
        self.index.as_ref().expect("index built above")
    }
}

impl SessionProvider for CodexProvider {
    fn vendor(&self) -> Vendor {
        Vendor::Codex
    }

    fn discover_projects(&mut self, cache: &mut SessionCache) -> Vec<(String, String)> {
        if !self.sessions_dir.is_dir() {
            return Vec::new();
        }
        let index = self.build_index(cache);
        let mut paths: Vec<&String> = index.keys().collect();
        paths.sort();
        paths
            .into_iter()
            .filter(|p| !p.is_empty() && p.as_str() != "/")
            .map(|p| {
                let display = crate::models::project::display_name_from_path(p);
                (p.clone(), display)
            })
            .collect()
    }

    fn sessions(&mut self, project_path: &str, cache: &mut SessionCache) -> Vec<SessionMeta> {
        let index = self.build_index(cache);
        let mut sessions = index.get(project_path).cloned().unwrap_or_default();
        sessions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        sessions
    }

    fn messages(&self, session: &SessionMeta) -> Vec<Message> {
        let Some(file) = &session.source_path else {
            return Vec::new();
        };
        let Ok(text) = fs::read_to_string(file) else {
            return Vec::new();
        };

        let mut messages = Vec::new();
        let mut call_names: HashMap<String, String> = HashMap::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(entry) = serde_json::from_str::<Value>(line) else { continue };
            let entry_type = entry.get("type").and_then(Value::as_str).unwrap_or("");
            let payload = entry.get("payload").cloned().unwrap_or(Value::Null);
            let ts = entry.get("timestamp").and_then(parse_timestamp);
            let payload_type = payload.get("type").and_then(Value::as_str).unwrap_or("");
            let payload_role = payload.get("role").and_then(Value::as_str).unwrap_or("");

            match (entry_type, payload_type) {
                ("event_msg", "user_message") => {
                    let text = payload.get("message").and_then(Value::as_str).unwrap_or("");
                    if !text.is_empty() {
                        let mut m = Message::text("user", text);
                        m.timestamp = ts;
                        messages.push(m);
                    }
                }
                ("event_msg", "agent_reasoning") => {
                    let text = payload.get("text").and_then(Value::as_str).unwrap_or("");
                    if !text.trim().is_empty() {
                        let mut m = Message::thinking(text);
                        m.timestamp = ts;
                        messages.push(m);
                    }
                }
                ("response_item", "function_call") => {
                    let name = payload.get("name").and_then(Value::as_str).unwrap_or("");
                    if let Some(call_id) = payload.get("call_id").and_then(Value::as_str)
                        && !name.is_empty()
                    {
                        call_names.insert(call_id.to_string(), name.to_string());
                    }
                    let args = stringify_tool_value(payload.get("arguments"));
                    let mut m = Message::tool_use(name, args);
                    m.timestamp = ts;
                    messages.push(m);
                }
                ("response_item", "function_call_output") => {
                    let call_id = payload.get("call_id").and_then(Value::as_str).unwrap_or("");
                    let name = call_names.get(call_id).cloned().unwrap_or_default();
                    let output = stringify_tool_value(payload.get("output"));
                    let mut m = Message::tool_result(name, output);
                    m.timestamp = ts;
                    messages.push(m);
                }
                ("response_item", _) if payload_role == "assistant" => {
                    let text = match payload.get("content") {
                        Some(Value::Array(items)) => extract_content_text(items),
                        Some(Value::String(s)) => s.clone(),
                        _ => String::new(),
                    };
                    if !text.trim().is_empty() {
                        let mut m = Message::text("assistant", text);
                        m.timestamp = ts;
                        messages.push(m);
                    }
                }
                // response_item records with role user/developer are injected
                // system instructions, not conversation.
                _ => {}
            }
        }

        messages
    }

    fn delete_session(&self, session: &SessionMeta) -> Result<()> {
        let Some(file) = &session.source_path else {
            return Ok(());
        };
        match fs::remove_file(file) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to delete session file: {}", file.display()))
            }
        }
    }

    fn relocate(&mut self, old_path: &str, new_path: &str) -> RelocationReport {
        let mut report = RelocationReport::ok(Vendor::Codex);
        if !self.sessions_dir.is_dir() {
            return report;
        }

        for file in session_files(&self.sessions_dir) {
            match rewrite_session_file(&file, old_path, new_path) {
                Ok(true) => report.files_rewritten += 1,
                Ok(false) => {}
                Err(e) => {
                    report.success = false;
                    report.error = Some(format!("Failed updating session metadata: {}", e));
                    return report;
                }
            }
        }

        // Every cached cwd grouping is stale now.
        self.index = None;
        report
    }

    fn dry_run_relocate(&self, old_path: &str, new_path: &str) -> RelocationReport {
        let mut report = RelocationReport::ok(Vendor::Codex);
        if !self.sessions_dir.is_dir() {
            return report;
        }
        for file in session_files(&self.sessions_dir) {
            if file_needs_rewrite(&file, old_path, new_path) {
                report.files_rewritten += 1;
            }
        }
        report
    }
}

/// All `*.jsonl` files under the sessions tree, sorted for determinism.
fn session_files(sessions_dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(sessions_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
        .collect();
    files.sort();
    files
}

/// Parse one rollout file into session metadata, or None when the file
/// carries no resolvable project.
fn parse_session_file(file: &Path) -> Option<SessionMeta> {
    let text = fs::read_to_string(file).ok()?;
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let first_line = lines.next()?;
    let first_entry: Value = serde_json::from_str(first_line.trim()).ok()?;

    if first_entry.get("type").and_then(Value::as_str) == Some("session_meta") {
        parse_meta_schema(file, &first_entry, lines)
    } else {
        parse_legacy_schema(file, &text)
    }
}

/// Newer schema: the opening `session_meta` record names the session.
fn parse_meta_schema<'a>(
    file: &Path,
    first_entry: &Value,
    rest: impl Iterator<Item = &'a str>,
) -> Option<SessionMeta> {
    let payload = first_entry.get("payload").cloned().unwrap_or(Value::Null);
    let session_id = payload
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| file_stem(file));
    let cwd = payload.get("cwd").and_then(Value::as_str).unwrap_or("").to_string();
    let model = payload
        .get("model")
        .and_then(Value::as_str)
        .or_else(|| payload.get("model_provider").and_then(Value::as_str))
        .filter(|m| !m.is_empty())
        .map(str::to_string);

    let first_ts = first_entry.get("timestamp").and_then(parse_timestamp);
    let mut last_ts = first_ts;
    let mut first_user_msg: Option<String> = None;
    let mut message_count = 0;

    for line in rest {
        let Ok(entry) = serde_json::from_str::<Value>(line.trim()) else { continue };
        if let Some(ts) = entry.get("timestamp").and_then(parse_timestamp) {
            last_ts = Some(ts);
        }
        let entry_type = entry.get("type").and_then(Value::as_str).unwrap_or("");
        let payload = entry.get("payload").cloned().unwrap_or(Value::Null);
        let payload_type = payload.get("type").and_then(Value::as_str).unwrap_or("");

        if entry_type == "event_msg" && payload_type == "user_message" {
            message_count += 1;
            if first_user_msg.is_none() {
                first_user_msg =
                    payload.get("message").and_then(Value::as_str).map(str::to_string);
            }
        } else if entry_type == "response_item"
            && payload.get("role").and_then(Value::as_str) == Some("assistant")
        {
            message_count += 1;
        }
    }

    if cwd.is_empty() {
        return None;
    }
    Some(SessionMeta {
        id: session_id,
        project_path: cwd,
        vendor: Vendor::Codex,
        summary: summary_from(first_user_msg),
        timestamp: last_ts.unwrap_or_else(Utc::now),
        start_timestamp: first_ts,
        message_count,
        model,
        source_path: Some(file.to_path_buf()),
    })
}

/// Legacy schema: the cwd hides inside an environment-context tag in message
/// content; the session id is the file stem.
fn parse_legacy_schema(file: &Path, text: &str) -> Option<SessionMeta> {
    let mut cwd = String::new();
    let mut first_ts: Option<DateTime<Utc>> = None;
    let mut last_ts: Option<DateTime<Utc>> = None;
    let mut first_user_msg: Option<String> = None;
    let mut message_count = 0;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(entry) = serde_json::from_str::<Value>(line) else { continue };
        if let Some(ts) = entry.get("timestamp").and_then(parse_timestamp) {
            if first_ts.is_none() {
                first_ts = Some(ts);
            }
            last_ts = Some(ts);
        }

        let payload = entry.get("payload").cloned().unwrap_or(Value::Null);
        if let Some(Value::Array(items)) = payload.get("content") {
            for item in items {
                let text = item
                    .get("text")
                    .and_then(Value::as_str)
                    .filter(|t| !t.is_empty())
                    .or_else(|| item.get("input_text").and_then(Value::as_str))
                    .unwrap_or("");
                if let Some(found) = extract_cwd_tag(text) {
                    cwd = found;
                }
            }
        }

        if entry.get("type").and_then(Value::as_str) == Some("event_msg")
            && payload.get("type").and_then(Value::as_str) == Some("user_message")
        {
            message_count += 1;
            if first_user_msg.is_none() {
                first_user_msg =
                    payload.get("message").and_then(Value::as_str).map(str::to_string);
            }
        }
    }

    if cwd.is_empty() {
        return None;
    }
    Some(SessionMeta {
        id: file_stem(file),
        project_path: cwd,
        vendor: Vendor::Codex,
        summary: summary_from(first_user_msg),
        timestamp: last_ts.unwrap_or_else(Utc::now),
        start_timestamp: first_ts,
        message_count,
        model: None,
        source_path: Some(file.to_path_buf()),
    })
}

fn summary_from(first_user_msg: Option<String>) -> String {
    match first_user_msg {
        Some(msg) if !msg.is_empty() => truncate_summary(&msg),
        _ => "Codex Session".to_string(),
    }
}

/// First `<cwd>...</cwd>` span in the text, if any.
fn extract_cwd_tag(text: &str) -> Option<String> {
    let start = text.find("<cwd>")? + "<cwd>".len();
    let end = text[start..].find("</cwd>")?;
    Some(text[start..start + end].to_string())
}

fn extract_content_text(items: &[Value]) -> String {
    let parts: Vec<&str> = items
        .iter()
        .filter_map(|item| {
            item.get("text")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .or_else(|| item.get("input_text").and_then(Value::as_str))
                .filter(|t| !t.is_empty())
                .or_else(|| item.get("output_text").and_then(Value::as_str))
                .filter(|t| !t.is_empty())
        })
        .collect();
    parts.join("\n")
}

/// Tool arguments and outputs may be strings or arbitrary JSON.
fn stringify_tool_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => serde_json::to_string_pretty(other).unwrap_or_default(),
    }
}

/// Rewrite one line for a project move. Returns the new line, or None when
/// unchanged.
fn rewrite_line(line: &str, is_first: bool, old_path: &str, new_path: &str) -> Option<String> {
    let old_tag = format!("<cwd>{}</cwd>", old_path);
    let new_tag = format!("<cwd>{}</cwd>", new_path);
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let Ok(mut entry) = serde_json::from_str::<Value>(trimmed) else {
        // Unparseable lines still get the blind tag replacement.
        if line.contains(&old_tag) {
            return Some(line.replace(&old_tag, &new_tag));
        }
        return None;
    };

    if is_first
        && entry.get("type").and_then(Value::as_str) == Some("session_meta")
        && entry.get("payload").and_then(|p| p.get("cwd")).and_then(Value::as_str)
            == Some(old_path)
    {
        entry["payload"]["cwd"] = Value::String(new_path.to_string());
        return serde_json::to_string(&entry).ok();
    }

    let mut changed = false;
    if let Some(Value::Array(items)) = entry.get_mut("payload").and_then(|p| p.get_mut("content")) {
        for item in items {
            let Some(obj) = item.as_object_mut() else { continue };
            for key in ["text", "input_text", "output_text"] {
                if let Some(Value::String(s)) = obj.get(key)
                    && s.contains(&old_tag)
                {
                    let replaced = s.replace(&old_tag, &new_tag);
                    obj.insert(key.to_string(), Value::String(replaced));
                    changed = true;
                }
            }
        }
    }
    if changed {
        return serde_json::to_string(&entry).ok();
    }

    if line.contains(&old_tag) {
        return Some(line.replace(&old_tag, &new_tag));
    }
    None
}

/// Rewrite cwd references in one rollout file. Returns whether the file was
/// modified.
fn rewrite_session_file(file: &Path, old_path: &str, new_path: &str) -> Result<bool> {
    let text = fs::read_to_string(file)
        .with_context(|| format!("Failed to read session file: {}", file.display()))?;

    let mut output: Vec<String> = Vec::new();
    let mut modified = false;
    for (idx, line) in text.lines().enumerate() {
        match rewrite_line(line, idx == 0, old_path, new_path) {
            Some(new_line) => {
                output.push(new_line);
                modified = true;
            }
            None => output.push(line.to_string()),
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

/// Detection half of [`rewrite_session_file`], shared shape so dry-run counts
/// are truthful.
fn file_needs_rewrite(file: &Path, old_path: &str, new_path: &str) -> bool {
    let Ok(text) = fs::read_to_string(file) else {
        return false;
    };
    text.lines()
        .enumerate()
        .any(|(idx, line)| rewrite_line(line, idx == 0, old_path, new_path).is_some())
}
