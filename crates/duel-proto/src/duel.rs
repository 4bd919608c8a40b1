//! The duel aggregate and its embedded reference data.
//!
//! A `Duel` is created server-side and only observed by clients: it is read
//! on connect, replaced wholesale by realtime pushes and snapshot fetches,
//! and never constructed locally.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sentinel participant id denoting the AI opponent in a PvE duel.
pub const AI_PLAYER_ID: &str = "ai";

/// Lifecycle status of a duel. Closed enumeration; all client branching
/// keys off this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuelStatus {
    Pending,
    GeneratingProblem,
    Waiting,
    InProgress,
    Completed,
    TimedOut,
    Cancelled,
    Error,
    FailedGeneration,
}

impl DuelStatus {
    /// True for statuses from which no further transition occurs.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DuelStatus::Completed | DuelStatus::TimedOut | DuelStatus::Cancelled
        )
    }

    /// True while the server is still preparing the duel and the client
    /// should keep polling the snapshot endpoint.
    pub fn is_preparing(self) -> bool {
        matches!(self, DuelStatus::Pending | DuelStatus::GeneratingProblem)
    }
}

/// A single test case attached to a problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
    /// Hidden cases are withheld from the arena UI but still run server-side.
    #[serde(default)]
    pub hidden: bool,
}

/// Problem snapshot embedded in a duel once generation completes.
/// Immutable after attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub title: String,
    pub description: String,
    pub difficulty: String,
    /// Per-language starter code, keyed by language id. BTreeMap keeps the
    /// template order stable for language derivation.
    #[serde(default)]
    pub starter_code: BTreeMap<String, String>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub time_limit_ms: Option<u64>,
    #[serde(default)]
    pub memory_limit_kb: Option<u64>,
}

/// Per-player slice of a terminal duel result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerResult {
    pub player_id: String,
    pub score: f64,
    pub time_taken_seconds: Option<f64>,
    #[serde(default)]
    pub submission_count: u32,
    #[serde(default)]
    pub is_winner: bool,
}

/// Terminal outcome of a duel. `winner_id` is None for a draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuelResult {
    pub winner_id: Option<String>,
    pub player_one: PlayerResult,
    /// Absent for PvE duels.
    pub player_two: Option<PlayerResult>,
    #[serde(default)]
    pub is_timeout: bool,
    #[serde(default)]
    pub is_ai_duel: bool,
}

/// The duel aggregate as pushed by the server or fetched via REST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Duel {
    pub id: String,
    pub status: DuelStatus,
    pub player_one_id: Option<String>,
    pub player_two_id: Option<String>,
    #[serde(default)]
    pub player_one_ready: bool,
    #[serde(default)]
    pub player_two_ready: bool,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub problem: Option<Problem>,
    pub results: Option<DuelResult>,
    #[serde(default)]
    pub room_code: Option<String>,
}

impl Duel {
    /// True when the second participant is the AI sentinel or absent.
    pub fn is_ai_duel(&self) -> bool {
        match self.player_two_id.as_deref() {
            None => true,
            Some(id) => id == AI_PLAYER_ID,
        }
    }

    /// True when the given user id is one of the participants.
    pub fn has_player(&self, user_id: &str) -> bool {
        self.player_one_id.as_deref() == Some(user_id)
            || self.player_two_id.as_deref() == Some(user_id)
    }
}

/// Immutable reference data for a language the execution backend supports.
///
/// The "current language" a user codes in is always a pointer into this
/// set, never a bare string, so the UI label and the execution backend
/// cannot drift apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedLanguage {
    pub id: String,
    pub name: String,
    pub extension: String,
    #[serde(default)]
    pub supports_classes: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_snake_case() {
        let json = serde_json::to_string(&DuelStatus::GeneratingProblem).unwrap();
        assert_eq!(json, "\"generating_problem\"");
        let back: DuelStatus = serde_json::from_str("\"timed_out\"").unwrap();
        assert_eq!(back, DuelStatus::TimedOut);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(DuelStatus::Completed.is_terminal());
        assert!(DuelStatus::TimedOut.is_terminal());
        assert!(DuelStatus::Cancelled.is_terminal());
        assert!(!DuelStatus::InProgress.is_terminal());
        assert!(!DuelStatus::Error.is_terminal());
    }

    #[test]
    fn test_duel_parses_with_minimal_fields() {
        let json = r#"{
            "id": "d1",
            "status": "pending",
            "player_one_id": "u1",
            "player_two_id": null,
            "created_at": "2026-02-01T10:00:00Z",
            "started_at": null,
            "finished_at": null,
            "problem": null,
            "results": null
        }"#;
        let duel: Duel = serde_json::from_str(json).unwrap();
        assert_eq!(duel.id, "d1");
        assert!(duel.is_ai_duel());
        assert!(!duel.player_one_ready);
    }

    #[test]
    fn test_ai_sentinel_detection() {
        let mut duel: Duel = serde_json::from_str(
            r#"{"id":"d1","status":"waiting","player_one_id":"u1","player_two_id":"u2",
                "created_at":"2026-02-01T10:00:00Z","started_at":null,"finished_at":null,
                "problem":null,"results":null}"#,
        )
        .unwrap();
        assert!(!duel.is_ai_duel());
        duel.player_two_id = Some(AI_PLAYER_ID.to_string());
        assert!(duel.is_ai_duel());
    }
}
