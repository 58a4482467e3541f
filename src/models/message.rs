use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a normalized message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Thinking,
    ToolUse,
    ToolResult,
}

/// One normalized message within a session.
///
/// For `Thinking` messages the reasoning text lives in `content`; tool
/// payloads live in `tool_input`/`tool_output` with `content` empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// "user", "assistant", "system", or "tool".
    pub role: String,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub kind: MessageKind,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<String>,
    #[serde(default)]
    pub tool_output: Option<String>,
    /// True for user-role messages that are really injected command/system
    /// traffic rather than something the user typed.
    #[serde(default)]
    pub is_system: bool,
}

impl Message {
    pub fn text(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: None,
            kind: MessageKind::Text,
            tool_name: None,
            tool_input: None,
            tool_output: None,
            is_system: false,
        }
    }

    pub fn thinking(content: impl Into<String>) -> Self {
        Self { kind: MessageKind::Thinking, ..Self::text("assistant", content) }
    }

    pub fn tool_use(name: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::ToolUse,
            tool_name: Some(name.into()),
            tool_input: Some(input.into()),
            ..Self::text("assistant", "")
        }
    }

    pub fn tool_result(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::ToolResult,
            tool_name: Some(name.into()),
            tool_output: Some(output.into()),
            ..Self::text("tool", "")
        }
    }
}
