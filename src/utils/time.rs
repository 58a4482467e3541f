//! Timestamp parsing shared by every vendor parser.
//!
//! Vendor logs carry timestamps as either epoch milliseconds or RFC3339
//! strings (with or without a trailing `Z`), sometimes both within one file.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Parse a timestamp value that may be epoch milliseconds or an RFC3339
/// string. Returns None for anything else.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let ms = n.as_f64()?;
            DateTime::from_timestamp_millis(ms as i64)
        }
        Value::String(s) => s.parse::<DateTime<Utc>>().ok(),
        _ => None,
    }
}

/// Like [`parse_timestamp`], falling back to the current time the way the
/// vendors' own tooling does when a record is missing its timestamp.
pub fn parse_timestamp_or_now(value: &Value) -> DateTime<Utc> {
    parse_timestamp(value).unwrap_or_else(Utc::now)
}

/// Truncate a summary candidate to 80 characters, appending an ellipsis when
/// anything was cut. Character-based so multi-byte text never splits.
pub fn truncate_summary(text: &str) -> String {
    const MAX_CHARS: usize = 80;
    if text.chars().count() > MAX_CHARS {
        let mut out: String = text.chars().take(MAX_CHARS).collect();
        out.push_str("...");
        out
    } else {
        text.to_string()
    }
}
