//! Cursor session provider.
//!
//! Cursor stores conversations in two unrelated universes:
//!
//! - CLI agent: `~/.cursor/chats/<md5(project_path)>/<session>/store.db`, a
//!   SQLite file with a `meta` key/value table (values are often hex-encoded
//!   JSON) and a `blobs` table mixing JSON messages with binary internals.
//!   The hash is one-way, so the project path is recovered from a
//!   "Workspace Path:" line inside the first few blobs.
//! - IDE: plain-text transcripts under
//!   `~/.cursor/projects/<encoded>/agent-transcripts/*.txt`, with richer
//!   metadata joined from the workspace's `state.vscdb` when the workspace
//!   registration (`workspaceStorage/*/workspace.json`) maps back to the
//!   project.
//!
//! The same conversation can appear in both; the store.db record wins.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags, params};
use serde_json::Value;
use walkdir::WalkDir;

use super::{SessionProvider, VendorRoots};
use crate::cache::SessionCache;
use crate::models::project::display_name_from_path;
use crate::models::{Message, RelocationReport, SessionMeta, Vendor};
use crate::utils::{chats_dir_hash, encode_cursor_path, parse_timestamp, workspace_uri};

pub struct CursorProvider {
    chats_dir: PathBuf,
    projects_dir: PathBuf,
    workspace_storage: PathBuf,
    /// project path -> workspace hash, from workspace.json registrations.
    workspace_map: Option<HashMap<String, String>>,
    /// project path -> encoded projects subdirectory.
    projects_dir_map: Option<HashMap<String, PathBuf>>,
}

impl CursorProvider {
    pub fn new(roots: &VendorRoots) -> Self {
        Self {
            chats_dir: roots.cursor_chats.clone(),
            projects_dir: roots.cursor_projects.clone(),
            workspace_storage: roots.cursor_workspace_storage.clone(),
            workspace_map: None,
            projects_dir_map: None,
        }
    }

    fn workspace_map(&mut self) -> &HashMap<String, String> {
        if self.workspace_map.is_none() {
            let mut map = HashMap::new();
            if self.workspace_storage.is_dir() {
                for ws_dir in sorted_subdirs(&self.workspace_storage) {
                    let ws_json = ws_dir.join("workspace.json");
                    let Ok(text) = fs::read_to_string(&ws_json) else { continue };
                    let Ok(data) = serde_json::from_str::<Value>(&text) else { continue };
                    let folder = data.get("folder").and_then(Value::as_str).unwrap_or("");
                    if let Some(project_path) = crate::utils::paths::path_from_workspace_uri(folder)
                        && let Some(name) = ws_dir.file_name()
                    {
                        map.insert(project_path, name.to_string_lossy().into_owned());
                    }
                }
            }
            self.workspace_map = Some(map);
        }
        self.workspace_map.as_ref().expect("map built above")
    }

    fn projects_dir_map(&mut self) -> &HashMap<String, PathBuf> {
        if self.projects_dir_map.is_none() {
            let mut map = HashMap::new();
            if self.projects_dir.is_dir() {
                let paths: Vec<String> = self.workspace_map().keys().cloned().collect();
                for project_path in paths {
                    let candidate = self.projects_dir.join(encode_cursor_path(&project_path));
                    if candidate.is_dir() {
                        map.insert(project_path, candidate);
                    }
                }
            }
            self.projects_dir_map = Some(map);
        }
        self.projects_dir_map.as_ref().expect("map built above")
    }

    fn read_composer_data(&mut self, project_path: &str) -> Vec<Value> {
        let Some(ws_hash) = self.workspace_map().get(project_path).cloned() else {
            return Vec::new();
        };
        let vscdb = self.workspace_storage.join(&ws_hash).join("state.vscdb");
        if !vscdb.is_file() {
            return Vec::new();
        }
        composer_entries(&vscdb).unwrap_or_default()
    }

    fn ide_sessions(&mut self, project_path: &str) -> Vec<SessionMeta> {
        let Some(proj_dir) = self.projects_dir_map().get(project_path).cloned() else {
            return Vec::new();
        };
        let transcripts_dir = proj_dir.join("agent-transcripts");
        let txt_files = transcript_files(&transcripts_dir);
        if txt_files.is_empty() {
            return Vec::new();
        }

        let composer_meta = self.read_composer_data(project_path);

        let mut sessions = Vec::new();
        let mut matched: HashSet<String> = HashSet::new();

        for entry in &composer_meta {
            let composer_id = entry.get("composerId").and_then(Value::as_str).unwrap_or("");
            let Some(transcript) = txt_files.get(composer_id) else { continue };
            matched.insert(composer_id.to_string());

            let summary = match entry.get("name").and_then(Value::as_str) {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => first_user_message(transcript)
                    .unwrap_or_else(|| "Untitled Session".to_string()),
            };
            // createdAt is epoch milliseconds here; string forms only appear
            // in store.db metadata.
            let timestamp = entry
                .get("createdAt")
                .filter(|v| v.is_number())
                .and_then(parse_timestamp)
                .unwrap_or_else(Utc::now);
            let model = entry
                .get("lastUsedModel")
                .and_then(Value::as_str)
                .map(str::to_string);

            sessions.push(SessionMeta {
                id: composer_id.to_string(),
                project_path: project_path.to_string(),
                vendor: Vendor::Cursor,
                summary,
                timestamp,
                start_timestamp: None,
                message_count: count_transcript_messages(transcript),
                model,
                source_path: Some(transcript.clone()),
            });
        }

        let mut unmatched: Vec<(&String, &PathBuf)> =
            txt_files.iter().filter(|(stem, _)| !matched.contains(*stem)).collect();
        unmatched.sort_by(|a, b| a.0.cmp(b.0));
        for (stem, path) in unmatched {
            let summary =
                first_user_message(path).unwrap_or_else(|| "Untitled Session".to_string());
            let timestamp = mtime_datetime(path).unwrap_or_else(Utc::now);
            sessions.push(SessionMeta {
                id: stem.clone(),
                project_path: project_path.to_string(),
                vendor: Vendor::Cursor,
                summary,
                timestamp,
                start_timestamp: None,
                message_count: count_transcript_messages(path),
                model: None,
                source_path: Some(path.clone()),
            });
        }

        sessions
    }
}

impl SessionProvider for CursorProvider {
    fn vendor(&self) -> Vendor {
        Vendor::Cursor
    }

    fn discover_projects(&mut self, _cache: &mut SessionCache) -> Vec<(String, String)> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::new();

        // CLI agent sessions: each hash directory names its project only
        // through blob content.
        if self.chats_dir.is_dir() {
            for hash_dir in sorted_subdirs(&self.chats_dir) {
                if let Some(workspace) = extract_workspace_path(&hash_dir) {
                    seen.insert(workspace.clone());
                    let display = display_name_from_path(&workspace);
                    out.push((workspace, display));
                }
            }
        }

        // IDE sessions via workspace registrations.
        let mut ide_paths: Vec<(String, PathBuf)> =
            self.projects_dir_map().iter().map(|(p, d)| (p.clone(), d.clone())).collect();
        ide_paths.sort_by(|a, b| a.0.cmp(&b.0));
        for (project_path, proj_dir) in ide_paths {
            if seen.contains(&project_path) {
                continue;
            }
            if !transcript_files(&proj_dir.join("agent-transcripts")).is_empty() {
                seen.insert(project_path.clone());
                let display = display_name_from_path(&project_path);
                out.push((project_path, display));
            }
        }

        out
    }

    fn sessions(&mut self, project_path: &str, cache: &mut SessionCache) -> Vec<SessionMeta> {
        let mut sessions: Vec<SessionMeta> = Vec::new();
        let mut seen_ids: HashSet<String> = HashSet::new();

        let cli_dir = self.chats_dir.join(chats_dir_hash(project_path));
        if cli_dir.is_dir() {
            for session_dir in sorted_subdirs(&cli_dir) {
                let store_db = session_dir.join("store.db");
                if !store_db.is_file() {
                    continue;
                }

                if let Some(cached) = cache.get_sessions(&store_db).filter(|s| !s.is_empty()) {
                    for session in cached {
                        seen_ids.insert(session.id.clone());
                        sessions.push(session);
                    }
                    continue;
                }

                let Some(meta) = read_session_meta(&store_db) else { continue };
                let Some(id) = session_dir.file_name().map(|n| n.to_string_lossy().into_owned())
                else {
                    continue;
                };
                seen_ids.insert(id.clone());
                let session = SessionMeta {
                    id,
                    project_path: project_path.to_string(),
                    vendor: Vendor::Cursor,
                    summary: meta.title,
                    timestamp: meta.timestamp,
                    start_timestamp: None,
                    message_count: meta.message_count,
                    model: meta.model,
                    source_path: Some(store_db.clone()),
                };
                cache.put_sessions(&store_db, std::slice::from_ref(&session));
                sessions.push(session);
            }
        }

        for session in self.ide_sessions(project_path) {
            if !seen_ids.contains(&session.id) {
                sessions.push(session);
            }
        }

        sessions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        sessions
    }

    fn messages(&self, session: &SessionMeta) -> Vec<Message> {
        let Some(source) = &session.source_path else {
            return Vec::new();
        };
        if !source.is_file() {
            return Vec::new();
        }
        if source.extension().is_some_and(|ext| ext == "txt") {
            parse_txt_transcript(source)
        } else {
            parse_store_db(source)
        }
    }

    fn delete_session(&self, session: &SessionMeta) -> Result<()> {
        let Some(source) = &session.source_path else {
            return Ok(());
        };
        if source.extension().is_some_and(|ext| ext == "txt") {
            if source.is_file() {
                fs::remove_file(source).with_context(|| {
                    format!("Failed to delete transcript: {}", source.display())
                })?;
            }
        } else if let Some(session_dir) = source.parent()
            && session_dir.is_dir()
        {
            fs::remove_dir_all(session_dir).with_context(|| {
                format!("Failed to delete session directory: {}", session_dir.display())
            })?;
        }
        Ok(())
    }

    fn relocate(&mut self, old_path: &str, new_path: &str) -> RelocationReport {
        let old_chats_dir = self.chats_dir.join(chats_dir_hash(old_path));
        let new_chats_dir = self.chats_dir.join(chats_dir_hash(new_path));
        let old_projects_dir = self.projects_dir.join(encode_cursor_path(old_path));
        let new_projects_dir = self.projects_dir.join(encode_cursor_path(new_path));

        let mut conflicts = Vec::new();
        if old_chats_dir.is_dir() && new_chats_dir.exists() {
            conflicts.push(format!("target chats directory exists: {}", new_chats_dir.display()));
        }
        if old_projects_dir.is_dir() && new_projects_dir.exists() {
            conflicts
                .push(format!("target projects directory exists: {}", new_projects_dir.display()));
        }
        if !conflicts.is_empty() {
            return RelocationReport::failed(Vendor::Cursor, conflicts.join("; "));
        }

        let mut report = RelocationReport::ok(Vendor::Cursor);

        let chats_dir = if old_chats_dir.is_dir() {
            if let Err(e) = fs::rename(&old_chats_dir, &new_chats_dir) {
                return RelocationReport::failed(
                    Vendor::Cursor,
                    format!("Failed to rename chats directory: {}", e),
                );
            }
            report.dirs_renamed += 1;
            Some(new_chats_dir)
        } else if new_chats_dir.is_dir() {
            Some(new_chats_dir)
        } else {
            None
        };

        if old_projects_dir.is_dir() {
            if let Err(e) = fs::rename(&old_projects_dir, &new_projects_dir) {
                report.success = false;
                report.error = Some(format!("Failed to rename projects directory: {}", e));
                return report;
            }
            report.dirs_renamed += 1;
        }

        let old_uri = workspace_uri(old_path);
        let new_uri = workspace_uri(new_path);
        if self.workspace_storage.is_dir() {
            for ws_dir in sorted_subdirs(&self.workspace_storage) {
                let ws_json = ws_dir.join("workspace.json");
                if !ws_json.is_file() {
                    continue;
                }
                match rewrite_workspace_json(&ws_json, &old_uri, &new_uri) {
                    Ok(true) => report.files_rewritten += 1,
                    Ok(false) | Err(_) => {}
                }
            }
        }

        // Blob rewrites are best-effort: a locked or malformed database must
        // not fail the move the directory renames already committed.
        let mut blob_errors: Vec<String> = Vec::new();
        if let Some(chats_dir) = chats_dir.filter(|d| d.is_dir()) {
            for store_db in store_db_files(&chats_dir) {
                match rewrite_store_db_blobs(&store_db, old_path, new_path) {
                    Ok(true) => report.files_rewritten += 1,
                    Ok(false) => {}
                    Err(e) => blob_errors.push(format!("{}: {}", store_db.display(), e)),
                }
            }
        }

        self.workspace_map = None;
        self.projects_dir_map = None;

        if !blob_errors.is_empty() {
            let mut snippet = blob_errors.iter().take(3).cloned().collect::<Vec<_>>().join("; ");
            if blob_errors.len() > 3 {
                snippet.push_str("; ...");
            }
            report.warning = Some(format!("Best-effort store.db update had errors: {}", snippet));
        }

        report
    }

    fn dry_run_relocate(&self, old_path: &str, new_path: &str) -> RelocationReport {
        let old_chats_dir = self.chats_dir.join(chats_dir_hash(old_path));
        let new_chats_dir = self.chats_dir.join(chats_dir_hash(new_path));
        let old_projects_dir = self.projects_dir.join(encode_cursor_path(old_path));
        let new_projects_dir = self.projects_dir.join(encode_cursor_path(new_path));

        let mut conflicts = Vec::new();
        if old_chats_dir.is_dir() && new_chats_dir.exists() {
            conflicts.push(format!("target chats directory exists: {}", new_chats_dir.display()));
        }
        if old_projects_dir.is_dir() && new_projects_dir.exists() {
            conflicts
                .push(format!("target projects directory exists: {}", new_projects_dir.display()));
        }
        if !conflicts.is_empty() {
            return RelocationReport::failed(Vendor::Cursor, conflicts.join("; "));
        }

        let mut report = RelocationReport::ok(Vendor::Cursor);
        report.dirs_renamed =
            usize::from(old_chats_dir.is_dir()) + usize::from(old_projects_dir.is_dir());

        let old_uri = workspace_uri(old_path);
        if self.workspace_storage.is_dir() {
            for ws_dir in sorted_subdirs(&self.workspace_storage) {
                let ws_json = ws_dir.join("workspace.json");
                let Ok(text) = fs::read_to_string(&ws_json) else { continue };
                if let Ok(data) = serde_json::from_str::<Value>(&text)
                    && data.get("folder").and_then(Value::as_str) == Some(old_uri.as_str())
                {
                    report.files_rewritten += 1;
                }
            }
        }

        let scan_dir = if old_chats_dir.is_dir() {
            Some(old_chats_dir)
        } else if new_chats_dir.is_dir() {
            Some(new_chats_dir)
        } else {
            None
        };
        if let Some(dir) = scan_dir {
            for store_db in store_db_files(&dir) {
                if store_db_mentions(&store_db, old_path) {
                    report.files_rewritten += 1;
                }
            }
        }

        report
    }
}

fn sorted_subdirs(dir: &Path) -> Vec<PathBuf> {
    let Ok(read) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = read.flatten().map(|e| e.path()).filter(|p| p.is_dir()).collect();
    dirs.sort();
    dirs
}

/// Transcript stem -> path for every `*.txt` under a transcripts directory.
fn transcript_files(transcripts_dir: &Path) -> HashMap<String, PathBuf> {
    let Ok(read) = fs::read_dir(transcripts_dir) else {
        return HashMap::new();
    };
    read.flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "txt"))
        .filter_map(|p| {
            let stem = p.file_stem()?.to_string_lossy().into_owned();
            Some((stem, p))
        })
        .collect()
}

fn store_db_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == "store.db")
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

fn open_read_only(path: &Path) -> rusqlite::Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
}

/// Text form of a SQLite cell that may be TEXT or a UTF-8 BLOB.
fn cell_text(value: &SqlValue) -> Option<String> {
    match value {
        SqlValue::Text(s) => Some(s.clone()),
        SqlValue::Blob(b) => String::from_utf8(b.clone()).ok(),
        _ => None,
    }
}

/// Decode a meta-table value that may be hex-encoded JSON, plain JSON, or a
/// raw string.
fn decode_meta_value(raw: &SqlValue) -> Value {
    let text = match raw {
        SqlValue::Text(s) => s.clone(),
        SqlValue::Blob(b) => String::from_utf8_lossy(b).into_owned(),
        SqlValue::Integer(i) => i.to_string(),
        SqlValue::Real(f) => f.to_string(),
        SqlValue::Null => return Value::Null,
    };

    if text.len() > 2 && text.chars().all(|c| c.is_ascii_hexdigit()) {
        if let Ok(bytes) = hex::decode(&text)
            && let Ok(decoded) = String::from_utf8(bytes)
            && let Ok(value) = serde_json::from_str::<Value>(&decoded)
        {
            return value;
        }
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(value) => value,
        Err(_) => Value::String(text),
    }
}

struct StoreMeta {
    title: String,
    timestamp: DateTime<Utc>,
    message_count: usize,
    model: Option<String>,
}

/// Read session metadata from one store.db, tolerating missing tables.
fn read_session_meta(store_db: &Path) -> Option<StoreMeta> {
    let conn = open_read_only(store_db).ok()?;

    let mut metadata: HashMap<String, Value> = HashMap::new();
    if let Ok(mut stmt) = conn.prepare("SELECT key, value FROM meta")
        && let Ok(rows) =
            stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, SqlValue>(1)?)))
    {
        for (key, raw) in rows.flatten() {
            metadata.insert(key, decode_meta_value(&raw));
        }
    }

    let message_count = count_role_blobs(&conn);
    drop(conn);

    // The meta table typically stores one opaque key whose decoded value is
    // a dict holding the real fields. Flatten nested dicts to the top level.
    let nested: Vec<Value> = metadata.values().filter(|v| v.is_object()).cloned().collect();
    for value in nested {
        if let Value::Object(map) = value {
            for (k, v) in map {
                metadata.insert(k, v);
            }
        }
    }

    let mut title = "Untitled Session".to_string();
    for key in ["name", "title", "sessionTitle"] {
        if let Some(val) = metadata.get(key).and_then(Value::as_str)
            && !val.trim().is_empty()
        {
            title = val.to_string();
            break;
        }
    }

    let model = metadata.get("lastUsedModel").and_then(Value::as_str).map(str::to_string);

    let timestamp = match metadata.get("createdAt").and_then(parse_timestamp) {
        Some(ts) => ts,
        None => mtime_datetime(store_db).unwrap_or_else(Utc::now),
    };

    Some(StoreMeta { title, timestamp, message_count, model })
}

/// Count blobs that are JSON objects with a role field. Everything else in
/// the table is binary internal state.
fn count_role_blobs(conn: &Connection) -> usize {
    let mut count = 0;
    if let Ok(mut stmt) = conn.prepare("SELECT data FROM blobs")
        && let Ok(rows) = stmt.query_map([], |row| row.get::<_, SqlValue>(0))
    {
        for raw in rows.flatten() {
            if let Some(text) = cell_text(&raw)
                && let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(&text)
                && obj.get("role").and_then(Value::as_str).is_some_and(|r| !r.is_empty())
            {
                count += 1;
            }
        }
    }
    count
}

/// Recover the project path for a hash directory from the user-info blob of
/// any of its sessions.
fn extract_workspace_path(hash_dir: &Path) -> Option<String> {
    for session_dir in sorted_subdirs(hash_dir) {
        let store_db = session_dir.join("store.db");
        if !store_db.is_file() {
            continue;
        }
        let Ok(conn) = open_read_only(&store_db) else { continue };
        let Ok(mut stmt) = conn.prepare("SELECT data FROM blobs LIMIT 10") else { continue };
        let Ok(rows) = stmt.query_map([], |row| row.get::<_, SqlValue>(0)) else { continue };
        for raw in rows.flatten() {
            let Some(text) = cell_text(&raw) else { continue };
            let Ok(obj) = serde_json::from_str::<Value>(&text) else { continue };
            if let Some(content) = obj.get("content").and_then(Value::as_str)
                && let Some(path) = workspace_path_from_content(content)
            {
                return Some(path);
            }
        }
    }
    None
}

fn workspace_path_from_content(content: &str) -> Option<String> {
    let idx = content.find("Workspace Path: ")?;
    let rest = &content[idx + "Workspace Path: ".len()..];
    let line = rest.lines().next().unwrap_or("").trim();
    if line.is_empty() { None } else { Some(line.to_string()) }
}

/// First user utterance of a transcript, up to 80 characters.
fn first_user_message(transcript: &Path) -> Option<String> {
    let text = fs::read_to_string(transcript).ok()?;
    let mut in_user = false;
    let mut lines: Vec<&str> = Vec::new();

    for line in text.lines() {
        let ended = line.trim_end();
        if ended == "user:" && !in_user {
            in_user = true;
            continue;
        }
        if in_user {
            if ended == "assistant:" || (!lines.is_empty() && ended.is_empty()) {
                break;
            }
            let stripped = line.trim();
            if stripped == "<user_query>" || stripped == "</user_query>" {
                continue;
            }
            if !stripped.is_empty() {
                lines.push(stripped);
            }
        }
    }

    let joined = lines.join(" ");
    let joined = joined.trim();
    if joined.is_empty() { None } else { Some(joined.chars().take(80).collect()) }
}

/// Count user and assistant turns in a transcript.
fn count_transcript_messages(transcript: &Path) -> usize {
    let Ok(text) = fs::read_to_string(transcript) else {
        return 0;
    };
    text.lines().filter(|l| matches!(l.trim_end(), "user:" | "assistant:")).count()
}

/// Parse a plain-text agent transcript into messages, splitting on role
/// header lines.
fn parse_txt_transcript(transcript: &Path) -> Vec<Message> {
    let Ok(text) = fs::read_to_string(transcript) else {
        return Vec::new();
    };

    let mut messages = Vec::new();
    let mut current_role: Option<&str> = None;
    let mut lines: Vec<&str> = Vec::new();

    let mut flush = |role: Option<&str>, lines: &mut Vec<&str>| {
        if let Some(role) = role {
            let body = lines.join("\n");
            let body = body.trim();
            if !body.is_empty() {
                let mut m = Message::text(role, body);
                m.is_system = role == "system";
                messages.push(m);
            }
        }
        lines.clear();
    };

    for line in text.lines() {
        let ended = line.trim_end();
        if let Some(role) = match ended {
            "user:" => Some("user"),
            "assistant:" => Some("assistant"),
            "system:" => Some("system"),
            _ => None,
        } {
            flush(current_role, &mut lines);
            current_role = Some(role);
            continue;
        }
        let stripped = line.trim();
        if stripped == "<user_query>" || stripped == "</user_query>" {
            continue;
        }
        if current_role.is_some() {
            lines.push(line);
        }
    }
    flush(current_role, &mut lines);

    messages
}

/// Parse JSON message blobs from a store.db into messages. Binary blobs and
/// unreadable rows are skipped.
fn parse_store_db(store_db: &Path) -> Vec<Message> {
    let mut messages = Vec::new();
    let Ok(conn) = open_read_only(store_db) else {
        return messages;
    };
    let Ok(mut stmt) = conn.prepare("SELECT data FROM blobs ORDER BY rowid") else {
        return messages;
    };
    let Ok(rows) = stmt.query_map([], |row| row.get::<_, SqlValue>(0)) else {
        return messages;
    };

    for raw in rows.flatten() {
        let Some(text) = cell_text(&raw) else { continue };
        let Ok(Value::Object(data)) = serde_json::from_str::<Value>(&text) else { continue };
        let role = data.get("role").and_then(Value::as_str).unwrap_or("");
        if role.is_empty() {
            continue;
        }

        match data.get("content") {
            Some(Value::String(content)) => {
                if !content.trim().is_empty() {
                    let mut m = Message::text(role, content.clone());
                    m.is_system = role == "system";
                    messages.push(m);
                }
            }
            Some(Value::Array(blocks)) => {
                for block in blocks {
                    match block.get("type").and_then(Value::as_str) {
                        Some("text") => {
                            let t = block.get("text").and_then(Value::as_str).unwrap_or("");
                            if !t.trim().is_empty() {
                                let mut m = Message::text(role, t);
                                m.is_system = role == "system";
                                messages.push(m);
                            }
                        }
                        Some("reasoning") => {
                            let t = block.get("text").and_then(Value::as_str).unwrap_or("");
                            if !t.trim().is_empty() {
                                messages.push(Message::thinking(t));
                            }
                        }
                        Some("tool-call") => {
                            let name =
                                block.get("toolName").and_then(Value::as_str).unwrap_or("");
                            let args = stringify_tool_value(block.get("args"));
                            messages.push(Message::tool_use(name, args));
                        }
                        Some("tool-result") => {
                            let name =
                                block.get("toolName").and_then(Value::as_str).unwrap_or("");
                            let result = stringify_tool_value(block.get("result"));
                            messages.push(Message::tool_result(name, result));
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    messages
}

fn stringify_tool_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => serde_json::to_string_pretty(other).unwrap_or_default(),
    }
}

/// Read the allComposers list from a workspace's state.vscdb.
fn composer_entries(vscdb: &Path) -> Option<Vec<Value>> {
    let conn = open_read_only(vscdb).ok()?;
    let raw: String = conn
        .query_row(
            "SELECT value FROM ItemTable WHERE key = 'composer.composerData'",
            [],
            |row| row.get(0),
        )
        .ok()?;
    let data: Value = serde_json::from_str(&raw).ok()?;
    match data.get("allComposers") {
        Some(Value::Array(items)) => Some(items.clone()),
        _ => None,
    }
}

/// Point a workspace.json at the new folder URI. Returns whether the file
/// was modified.
fn rewrite_workspace_json(ws_json: &Path, old_uri: &str, new_uri: &str) -> Result<bool> {
    let text = fs::read_to_string(ws_json)
        .with_context(|| format!("Failed to read workspace file: {}", ws_json.display()))?;
    let mut data: Value = serde_json::from_str(&text)
        .with_context(|| format!("Invalid workspace file: {}", ws_json.display()))?;
    if data.get("folder").and_then(Value::as_str) != Some(old_uri) {
        return Ok(false);
    }
    data["folder"] = Value::String(new_uri.to_string());
    let mut contents = serde_json::to_string_pretty(&data)?;
    contents.push('\n');
    crate::utils::write_atomic(ws_json, &contents)?;
    Ok(true)
}

/// Replace old-path references in UTF-8 blobs of a store.db.
fn rewrite_store_db_blobs(store_db: &Path, old_path: &str, new_path: &str) -> Result<bool> {
    let mut conn = Connection::open(store_db)
        .with_context(|| format!("Failed to open database: {}", store_db.display()))?;
    let tx = conn.transaction()?;

    let mut updates: Vec<(i64, SqlValue)> = Vec::new();
    {
        let mut stmt = tx.prepare("SELECT rowid, data FROM blobs")?;
        let rows =
            stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, SqlValue>(1)?)))?;
        for row in rows {
            let (rowid, raw) = row?;
            let Some(text) = cell_text(&raw) else { continue };
            if !text.contains(old_path) {
                continue;
            }
            let replaced = text.replace(old_path, new_path);
            let new_value = match raw {
                SqlValue::Blob(_) => SqlValue::Blob(replaced.into_bytes()),
                _ => SqlValue::Text(replaced),
            };
            updates.push((rowid, new_value));
        }
    }

    let modified = !updates.is_empty();
    for (rowid, value) in updates {
        tx.execute("UPDATE blobs SET data = ?1 WHERE rowid = ?2", params![value, rowid])?;
    }
    tx.commit()?;
    Ok(modified)
}

/// Detection half of [`rewrite_store_db_blobs`] for dry runs.
fn store_db_mentions(store_db: &Path, old_path: &str) -> bool {
    let Ok(conn) = open_read_only(store_db) else {
        return false;
    };
    let Ok(mut stmt) = conn.prepare("SELECT data FROM blobs") else {
        return false;
    };
    let Ok(rows) = stmt.query_map([], |row| row.get::<_, SqlValue>(0)) else {
        return false;
    };
    rows.flatten().any(|raw| cell_text(&raw).is_some_and(|text| text.contains(old_path)))
}

fn mtime_datetime(path: &Path) -> Option<DateTime<Utc>> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::models::MessageKind;
    use crate::providers::test_support::roots_under;

    /// store.db with a hex-encoded meta dict and the given JSON blobs.
    fn make_store_db(path: &Path, meta_json: Option<&Value>, blobs: &[&str]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE meta (key TEXT, value TEXT);
             CREATE TABLE blobs (id TEXT, data BLOB);",
        )
        .unwrap();
        if let Some(meta) = meta_json {
            let encoded = hex::encode(meta.to_string().as_bytes());
            conn.execute("INSERT INTO meta (key, value) VALUES ('0', ?1)", params![encoded])
                .unwrap();
        }
        for (i, blob) in blobs.iter().enumerate() {
            conn.execute(
                "INSERT INTO blobs (id, data) VALUES (?1, ?2)",
                params![i.to_string(), blob.as_bytes()],
            )
            .unwrap();
        }
    }

    fn make_workspace(roots: &VendorRoots, ws_hash: &str, project_path: &str) {
        let ws_dir = roots.cursor_workspace_storage.join(ws_hash);
        fs::create_dir_all(&ws_dir).unwrap();
        let data = serde_json::json!({"folder": workspace_uri(project_path)});
        fs::write(ws_dir.join("workspace.json"), serde_json::to_string_pretty(&data).unwrap())
            .unwrap();
    }

    fn make_state_vscdb(roots: &VendorRoots, ws_hash: &str, composers: &Value) {
        let vscdb = roots.cursor_workspace_storage.join(ws_hash).join("state.vscdb");
        let conn = Connection::open(&vscdb).unwrap();
        conn.execute_batch("CREATE TABLE ItemTable (key TEXT PRIMARY KEY, value TEXT);").unwrap();
        let value = serde_json::json!({"allComposers": composers}).to_string();
        conn.execute(
            "INSERT INTO ItemTable (key, value) VALUES ('composer.composerData', ?1)",
            params![value],
        )
        .unwrap();
    }

    const TRANSCRIPT: &str = "user:\n<user_query>\nFix the login bug\n</user_query>\n\nassistant:\nLooking at it now.\n";

    #[test]
    fn test_read_session_meta_hex_encoded_fields() {
        let tmp = TempDir::new().unwrap();
        let store_db = tmp.path().join("s1/store.db");
        make_store_db(
            &store_db,
            Some(&serde_json::json!({
                "name": "Refactor the cache",
                "createdAt": 1735689600000i64,
                "lastUsedModel": "gpt-5",
            })),
            &[
                r#"{"role":"user","content":"hello"}"#,
                r#"{"role":"assistant","content":"hi"}"#,
                "\u{1}binary-protobuf-noise",
            ],
        );

        let meta = read_session_meta(&store_db).unwrap();
        assert_eq!(meta.title, "Refactor the cache");
        assert_eq!(meta.model.as_deref(), Some("gpt-5"));
        assert_eq!(meta.message_count, 2);
        assert_eq!(meta.timestamp.to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_read_session_meta_falls_back_to_mtime_and_default_title() {
        let tmp = TempDir::new().unwrap();
        let store_db = tmp.path().join("s1/store.db");
        make_store_db(&store_db, None, &[]);

        let meta = read_session_meta(&store_db).unwrap();
        assert_eq!(meta.title, "Untitled Session");
        assert_eq!(meta.message_count, 0);
        assert!(meta.model.is_none());
    }

    #[test]
    fn test_discover_cli_project_via_workspace_path_blob() {
        let tmp = TempDir::new().unwrap();
        let roots = roots_under(tmp.path());
        let store_db = roots.cursor_chats.join(chats_dir_hash("/proj")).join("s1/store.db");
        make_store_db(
            &store_db,
            None,
            &[r#"{"role":"user","content":"Workspace Path: /proj\nOS: linux"}"#],
        );

        let mut cache = SessionCache::in_memory();
        let mut provider = CursorProvider::new(&roots);
        let projects = provider.discover_projects(&mut cache);

        assert_eq!(projects, vec![("/proj".to_string(), "proj".to_string())]);
    }

    #[test]
    fn test_discover_ide_project_via_workspace_registration() {
        let tmp = TempDir::new().unwrap();
        let roots = roots_under(tmp.path());
        make_workspace(&roots, "hash1", "/proj");
        let transcripts =
            roots.cursor_projects.join(encode_cursor_path("/proj")).join("agent-transcripts");
        fs::create_dir_all(&transcripts).unwrap();
        fs::write(transcripts.join("abc.txt"), TRANSCRIPT).unwrap();

        let mut cache = SessionCache::in_memory();
        let mut provider = CursorProvider::new(&roots);
        let projects = provider.discover_projects(&mut cache);

        assert_eq!(projects, vec![("/proj".to_string(), "proj".to_string())]);
    }

    #[test]
    fn test_ide_session_joined_with_composer_metadata() {
        let tmp = TempDir::new().unwrap();
        let roots = roots_under(tmp.path());
        make_workspace(&roots, "hash1", "/proj");
        make_state_vscdb(
            &roots,
            "hash1",
            &serde_json::json!([{
                "composerId": "abc",
                "name": "Fix login",
                "createdAt": 1735689600000i64,
                "lastUsedModel": "gpt-5",
            }]),
        );
        let transcripts =
            roots.cursor_projects.join(encode_cursor_path("/proj")).join("agent-transcripts");
        fs::create_dir_all(&transcripts).unwrap();
        fs::write(transcripts.join("abc.txt"), TRANSCRIPT).unwrap();

        let mut cache = SessionCache::in_memory();
        let mut provider = CursorProvider::new(&roots);
        let sessions = provider.sessions("/proj", &mut cache);

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "abc");
        assert_eq!(sessions[0].summary, "Fix login");
        assert_eq!(sessions[0].model.as_deref(), Some("gpt-5"));
        assert_eq!(sessions[0].message_count, 2);
        assert_eq!(sessions[0].timestamp.to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_unmatched_transcript_summarized_from_first_user_message() {
        let tmp = TempDir::new().unwrap();
        let roots = roots_under(tmp.path());
        make_workspace(&roots, "hash1", "/proj");
        let transcripts =
            roots.cursor_projects.join(encode_cursor_path("/proj")).join("agent-transcripts");
        fs::create_dir_all(&transcripts).unwrap();
        fs::write(transcripts.join("orphan.txt"), TRANSCRIPT).unwrap();

        let mut cache = SessionCache::in_memory();
        let mut provider = CursorProvider::new(&roots);
        let sessions = provider.sessions("/proj", &mut cache);

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "orphan");
        assert_eq!(sessions[0].summary, "Fix the login bug");
        assert!(sessions[0].model.is_none());
    }

    #[test]
    fn test_cli_session_wins_over_ide_duplicate() {
        let tmp = TempDir::new().unwrap();
        let roots = roots_under(tmp.path());
        let store_db = roots.cursor_chats.join(chats_dir_hash("/proj")).join("abc/store.db");
        make_store_db(
            &store_db,
            Some(&serde_json::json!({"name": "CLI view", "createdAt": 1735689600000i64})),
            &[],
        );
        make_workspace(&roots, "hash1", "/proj");
        let transcripts =
            roots.cursor_projects.join(encode_cursor_path("/proj")).join("agent-transcripts");
        fs::create_dir_all(&transcripts).unwrap();
        fs::write(transcripts.join("abc.txt"), TRANSCRIPT).unwrap();

        let mut cache = SessionCache::in_memory();
        let mut provider = CursorProvider::new(&roots);
        let sessions = provider.sessions("/proj", &mut cache);

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].summary, "CLI view");
        assert_eq!(sessions[0].source_path.as_deref(), Some(store_db.as_path()));
    }

    #[test]
    fn test_parse_txt_transcript_roles_and_tags() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("t.txt");
        fs::write(&path, "system:\nbe helpful\nuser:\n<user_query>\nhello there\n</user_query>\nassistant:\nhi!\n").unwrap();

        let messages = parse_txt_transcript(&path);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].is_system);
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[1].content, "hello there");
        assert_eq!(messages[2].role, "assistant");
        assert_eq!(messages[2].content, "hi!");
    }

    #[test]
    fn test_parse_store_db_blocks() {
        let tmp = TempDir::new().unwrap();
        let store_db = tmp.path().join("s1/store.db");
        make_store_db(
            &store_db,
            None,
            &[
                r#"{"role":"user","content":"run the tests"}"#,
                r#"{"role":"assistant","content":[
                    {"type":"reasoning","text":"planning"},
                    {"type":"tool-call","toolName":"shell","args":{"cmd":"cargo test"}},
                    {"type":"tool-result","toolName":"shell","result":"ok"},
                    {"type":"text","text":"all green"}
                ]}"#,
                "\u{2}not-json",
            ],
        );

        let messages = parse_store_db(&store_db);
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0].content, "run the tests");
        assert_eq!(messages[1].kind, MessageKind::Thinking);
        assert_eq!(messages[2].kind, MessageKind::ToolUse);
        assert_eq!(messages[2].tool_name.as_deref(), Some("shell"));
        assert_eq!(messages[3].kind, MessageKind::ToolResult);
        assert_eq!(messages[3].tool_output.as_deref(), Some("ok"));
        assert_eq!(messages[4].content, "all green");
    }

    #[test]
    fn test_delete_transcript_and_store_db_sessions() {
        let tmp = TempDir::new().unwrap();
        let roots = roots_under(tmp.path());
        let txt = tmp.path().join("t.txt");
        fs::write(&txt, TRANSCRIPT).unwrap();
        let store_db = tmp.path().join("sess/store.db");
        make_store_db(&store_db, None, &[]);

        let provider = CursorProvider::new(&roots);
        let mut session = SessionMeta {
            id: "t".to_string(),
            project_path: "/proj".to_string(),
            vendor: Vendor::Cursor,
            summary: String::new(),
            timestamp: Utc::now(),
            start_timestamp: None,
            message_count: 0,
            model: None,
            source_path: Some(txt.clone()),
        };
        provider.delete_session(&session).unwrap();
        assert!(!txt.exists());

        session.source_path = Some(store_db.clone());
        provider.delete_session(&session).unwrap();
        assert!(!store_db.parent().unwrap().exists());
    }

    #[test]
    fn test_relocate_renames_both_dirs_and_rewrites_references() {
        let tmp = TempDir::new().unwrap();
        let roots = roots_under(tmp.path());
        let store_db = roots.cursor_chats.join(chats_dir_hash("/old")).join("s1/store.db");
        make_store_db(&store_db, None, &[r#"{"role":"user","content":"Workspace Path: /old"}"#]);
        fs::create_dir_all(
            roots.cursor_projects.join(encode_cursor_path("/old")).join("agent-transcripts"),
        )
        .unwrap();
        make_workspace(&roots, "hash1", "/old");

        let mut provider = CursorProvider::new(&roots);
        let dry = provider.dry_run_relocate("/old", "/new");
        let report = provider.relocate("/old", "/new");

        assert!(report.success);
        assert_eq!(report.dirs_renamed, 2);
        assert_eq!(report.files_rewritten, 2);
        assert_eq!(
            (dry.dirs_renamed, dry.files_rewritten),
            (report.dirs_renamed, report.files_rewritten)
        );
        assert!(report.warning.is_none());

        assert!(roots.cursor_chats.join(chats_dir_hash("/new")).is_dir());
        assert!(roots.cursor_projects.join(encode_cursor_path("/new")).is_dir());

        let ws_text = fs::read_to_string(
            roots.cursor_workspace_storage.join("hash1/workspace.json"),
        )
        .unwrap();
        assert!(ws_text.contains(&workspace_uri("/new")));

        let moved_db = roots.cursor_chats.join(chats_dir_hash("/new")).join("s1/store.db");
        let messages = parse_store_db(&moved_db);
        assert!(messages[0].content.contains("Workspace Path: /new"));
    }

    #[test]
    fn test_relocate_conflict_lists_both_targets() {
        let tmp = TempDir::new().unwrap();
        let roots = roots_under(tmp.path());
        for path in ["/old", "/new"] {
            fs::create_dir_all(roots.cursor_chats.join(chats_dir_hash(path))).unwrap();
            fs::create_dir_all(roots.cursor_projects.join(encode_cursor_path(path))).unwrap();
        }

        let mut provider = CursorProvider::new(&roots);
        let report = provider.relocate("/old", "/new");

        assert!(!report.success);
        let error = report.error.unwrap();
        assert!(error.contains("target chats directory exists"));
        assert!(error.contains("target projects directory exists"));
        assert!(error.contains("; "));
    }

    #[test]
    fn test_relocate_with_no_cursor_data_is_a_noop() {
        let tmp = TempDir::new().unwrap();
        let mut provider = CursorProvider::new(&roots_under(tmp.path()));
        let report = provider.relocate("/old", "/new");
        assert!(report.success);
        assert_eq!(report.dirs_renamed, 0);
        assert_eq!(report.files_rewritten, 0);
    }

    #[test]
    fn test_first_user_message_truncates_to_80_chars() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("t.txt");
        let long = "z".repeat(120);
        fs::write(&path, format!("user:\n{long}\n\nassistant:\nok\n")).unwrap();

        let msg = first_user_message(&path).unwrap();
        assert_eq!(msg.chars().count(), 80);
    }
}
