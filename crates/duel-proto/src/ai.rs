//! The scripted AI coding process.
//!
//! The server sends one script per PvE duel describing how the simulated
//! opponent "writes" its solution. The script itself is immutable; the
//! client replays it over time and persists progress alongside it.

use serde::{Deserialize, Serialize};

/// One scripted action in an AI coding process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AiAction {
    /// Append `content` one character at a time. `speed` scales the
    /// per-character cadence; it is script-supplied.
    Type { content: String, speed: f64 },
    /// Suspend the typing indicator for roughly `duration` seconds.
    Pause { duration: f64 },
    /// Remove `char_count` characters from the tail, one at a time.
    Delete { char_count: usize },
}

/// An ordered, immutable AI coding script.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AiScript(pub Vec<AiAction>);

impl AiScript {
    pub fn new(actions: Vec<AiAction>) -> Self {
        Self(actions)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn actions(&self) -> &[AiAction] {
        &self.0
    }

    /// Duplicate-script heuristic: the server re-sends the same script on
    /// reconnect without any version id, so two scripts with the same
    /// length and the same first action are treated as the same script.
    pub fn matches(&self, other: &AiScript) -> bool {
        self.len() == other.len() && self.0.first() == other.0.first()
    }
}
