//! Vendor path-encoding schemes.
//!
//! Each vendor derives an on-disk directory name from the absolute project
//! path in its own way. These encodings are one-way in practice (dashes in
//! the original path are ambiguous), so nothing here tries to decode; true
//! paths are recovered by scanning session contents instead.

use std::path::Path;

use md5::{Digest, Md5};

/// Encode a path the way Claude Code names `~/.claude/projects/` entries:
/// `/` and spaces become `-`, the leading `/` is kept as a leading `-`.
///
/// # Examples
///
/// ```
/// use sesh_core::utils::encode_claude_path;
/// assert_eq!(encode_claude_path("/Users/me/My Project"), "-Users-me-My-Project");
/// ```
pub fn encode_claude_path(path: &str) -> String {
    path.replace('/', "-").replace(' ', "-")
}

/// Encode a path the way Cursor names `~/.cursor/projects/` entries: the
/// leading `/` is stripped, then `/` and spaces become `-`.
///
/// # Examples
///
/// ```
/// use sesh_core::utils::encode_cursor_path;
/// assert_eq!(encode_cursor_path("/Users/me/My Project"), "Users-me-My-Project");
/// ```
pub fn encode_cursor_path(path: &str) -> String {
    path.trim_start_matches('/').replace('/', "-").replace(' ', "-")
}

/// Hash a project path the way Cursor names `~/.cursor/chats/` entries:
/// lowercase hex MD5 of the absolute path.
pub fn chats_dir_hash(path: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(path.as_bytes());
    hex::encode(hasher.finalize())
}

/// Convert an absolute path to the `file://` URI Cursor stores in
/// `workspace.json`.
pub fn workspace_uri(path: &str) -> String {
    format!("file://{}", path)
}

/// Extract a project path from a `file://` workspace URI, if it is one.
pub fn path_from_workspace_uri(uri: &str) -> Option<String> {
    // Cursor writes file:///abs/path; keep the third slash as the path root.
    uri.strip_prefix("file://").filter(|p| p.starts_with('/')).map(str::to_string)
}

/// True when a directory entry name is a session data file a parser should
/// read: `*.jsonl` without the reserved sub-agent prefix.
pub fn is_session_data_file(name: &str) -> bool {
    name.ends_with(".jsonl") && !name.starts_with("agent-")
}

/// File stem (name without extension) as an owned string, empty if absent.
pub fn file_stem(path: &Path) -> String {
    path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_claude_path_keeps_leading_dash() {
        assert_eq!(encode_claude_path("/a/b c"), "-a-b-c");
    }

    #[test]
    fn test_encode_cursor_path_strips_leading_slash() {
        assert_eq!(encode_cursor_path("/a/b c"), "a-b-c");
    }

    #[test]
    fn test_chats_dir_hash_is_md5_hex() {
        // Known digest: md5 of the empty string.
        assert_eq!(chats_dir_hash(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(chats_dir_hash("/tmp/proj").len(), 32);
        assert_ne!(chats_dir_hash("/tmp/proj"), chats_dir_hash("/tmp/other"));
    }

    #[test]
    fn test_workspace_uri_roundtrip() {
        let uri = workspace_uri("/Users/me/proj");
        assert_eq!(uri, "file:///Users/me/proj");
        assert_eq!(path_from_workspace_uri(&uri).as_deref(), Some("/Users/me/proj"));
        assert_eq!(path_from_workspace_uri("vscode-remote://x"), None);
    }

    #[test]
    fn test_is_session_data_file() {
        assert!(is_session_data_file("abc.jsonl"));
        assert!(!is_session_data_file("agent-abc.jsonl"));
        assert!(!is_session_data_file("abc.txt"));
    }
}
