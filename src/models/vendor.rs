use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the three supported AI coding assistants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Claude,
    Codex,
    Cursor,
}

impl Vendor {
    pub const ALL: [Vendor; 3] = [Vendor::Claude, Vendor::Codex, Vendor::Cursor];

    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::Claude => "claude",
            Vendor::Codex => "codex",
            Vendor::Cursor => "cursor",
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vendor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude" => Ok(Vendor::Claude),
            "codex" => Ok(Vendor::Codex),
            "cursor" => Ok(Vendor::Cursor),
            other => Err(format!("unknown vendor: {}", other)),
        }
    }
}
