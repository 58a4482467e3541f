pub mod fsio;
pub mod paths;
pub mod time;

pub use fsio::write_atomic;
pub use paths::{chats_dir_hash, encode_claude_path, encode_cursor_path, workspace_uri};
pub use time::{parse_timestamp, parse_timestamp_or_now, truncate_summary};
