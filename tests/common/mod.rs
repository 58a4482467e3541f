//! Shared test utilities for integration tests
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, params};
use sesh_core::providers::VendorRoots;
use sesh_core::utils::{chats_dir_hash, encode_claude_path, encode_cursor_path, workspace_uri};

/// Vendor roots rooted entirely under one temp directory.
pub fn vendor_roots(base: &Path) -> VendorRoots {
    VendorRoots {
        claude_projects: base.join("claude/projects"),
        codex_sessions: base.join("codex/sessions"),
        cursor_chats: base.join("cursor/chats"),
        cursor_projects: base.join("cursor/projects"),
        cursor_workspace_storage: base.join("cursor/workspaceStorage"),
    }
}

pub fn write_jsonl(path: &Path, lines: &[serde_json::Value]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let text: String =
        lines.iter().map(|l| serde_json::to_string(l).unwrap() + "\n").collect();
    fs::write(path, text).unwrap();
}

/// One Claude session event with an embedded cwd.
pub fn claude_event(
    session_id: &str,
    uuid: &str,
    cwd: &str,
    role: &str,
    text: &str,
    ts: &str,
) -> serde_json::Value {
    serde_json::json!({
        "type": role,
        "sessionId": session_id,
        "uuid": uuid,
        "parentUuid": null,
        "cwd": cwd,
        "timestamp": ts,
        "message": {"role": role, "content": text},
    })
}

/// Seed a Claude project directory for the given project path.
pub fn seed_claude_project(roots: &VendorRoots, project_path: &str, session_id: &str) -> PathBuf {
    let dir = roots.claude_projects.join(encode_claude_path(project_path));
    write_jsonl(
        &dir.join("session.jsonl"),
        &[claude_event(
            session_id,
            &format!("uuid-{session_id}"),
            project_path,
            "user",
            "set up the project",
            "2025-05-01T10:00:00Z",
        )],
    );
    dir
}

/// Opening session_meta record of a Codex rollout file.
pub fn codex_meta(id: &str, cwd: &str, ts: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "session_meta",
        "timestamp": ts,
        "payload": {"id": id, "cwd": cwd, "model": "gpt-5"},
    })
}

pub fn seed_codex_session(roots: &VendorRoots, project_path: &str, session_id: &str) -> PathBuf {
    let file = roots.codex_sessions.join(format!("2025/05/01/{session_id}.jsonl"));
    write_jsonl(
        &file,
        &[
            codex_meta(session_id, project_path, "2025-05-01T11:00:00Z"),
            serde_json::json!({
                "type": "event_msg",
                "timestamp": "2025-05-01T11:01:00Z",
                "payload": {"type": "user_message", "message": format!("working in {project_path}")},
            }),
        ],
    );
    file
}

/// A Cursor CLI store.db with the given JSON blobs.
pub fn make_store_db(path: &Path, blobs: &[String]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE meta (key TEXT, value TEXT);
         CREATE TABLE blobs (id TEXT, data BLOB);",
    )
    .unwrap();
    for (i, blob) in blobs.iter().enumerate() {
        conn.execute(
            "INSERT INTO blobs (id, data) VALUES (?1, ?2)",
            params![i.to_string(), blob.as_bytes()],
        )
        .unwrap();
    }
}

/// Seed a full Cursor footprint for a project: a CLI chats session, an
/// encoded projects directory, and a workspace registration.
pub fn seed_cursor_project(roots: &VendorRoots, project_path: &str, ws_hash: &str) -> PathBuf {
    let store_db = roots
        .cursor_chats
        .join(chats_dir_hash(project_path))
        .join("session-1/store.db");
    make_store_db(
        &store_db,
        &[format!(
            r#"{{"role":"user","content":"Workspace Path: {project_path}\nOS: linux"}}"#
        )],
    );

    fs::create_dir_all(
        roots.cursor_projects.join(encode_cursor_path(project_path)).join("agent-transcripts"),
    )
    .unwrap();

    let ws_dir = roots.cursor_workspace_storage.join(ws_hash);
    fs::create_dir_all(&ws_dir).unwrap();
    let data = serde_json::json!({"folder": workspace_uri(project_path)});
    fs::write(ws_dir.join("workspace.json"), serde_json::to_string_pretty(&data).unwrap())
        .unwrap();

    store_db
}

/// Collect every text file under a directory whose contents mention
/// `needle`. SQLite databases are checked through their live blob rows
/// instead of raw bytes, since freed pages may retain stale text.
pub fn files_mentioning(root: &Path, needle: &str) -> Vec<PathBuf> {
    let mut hits = Vec::new();
    for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        if path.extension().is_some_and(|ext| ext == "db" || ext == "vscdb") {
            if store_db_blobs_mention(&path, needle) {
                hits.push(path);
            }
        } else if fs::read_to_string(&path).is_ok_and(|text| text.contains(needle)) {
            hits.push(path);
        }
    }
    hits
}

fn store_db_blobs_mention(db: &Path, needle: &str) -> bool {
    let Ok(conn) = Connection::open(db) else { return false };
    let Ok(mut stmt) = conn.prepare("SELECT data FROM blobs") else { return false };
    let Ok(rows) = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0)) else { return false };
    rows.flatten().any(|bytes| String::from_utf8(bytes).is_ok_and(|t| t.contains(needle)))
}
