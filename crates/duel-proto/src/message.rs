//! Realtime message taxonomy for the duel WebSocket channel.
//!
//! Inbound frames are a JSON envelope with a `type` discriminator and either
//! a `data` object or flat extra fields. The original protocol is
//! inconsistent about which; [`ServerEvent::parse`] normalizes both forms by
//! reading the payload from `data` when present and from the envelope
//! remainder otherwise. Unknown `type` strings decode to
//! [`ServerEvent::Unknown`] and must never fail the connection.
//!
//! Outbound frames are always `{type, ...payload}` except `pong`, which
//! echoes the ping timestamp under `data` as the server expects.

use crate::ai::AiScript;
use crate::duel::{Duel, DuelResult};
use crate::submission::TestResultPush;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opponent-AI status as driven by realtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiStatus {
    Idle,
    Thinking,
    Typing,
    Solved,
    GaveUp,
    Struggling,
}

/// A classified inbound server event.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Lobby roster changed; payload replaces the cached duel snapshot.
    PlayerJoined { duel: Duel },
    PlayerLeft { duel: Duel },
    PlayerReadyChanged { duel: Duel },
    /// Matchmaking assigned a duel; reconnect to the new id.
    MatchFound { duel_id: String },
    /// Signal only; the problem is fetched via REST.
    ProblemGenerated,
    CodeUpdate {
        sender_id: Option<String>,
        code: String,
    },
    TypingStatus {
        sender_id: Option<String>,
        is_typing: bool,
    },
    /// Full or partial duel push. `duel` is None when the payload did not
    /// carry a full duel object, in which case the client refetches.
    DuelState { duel: Option<Duel> },
    DuelUpdate { duel: Option<Duel> },
    DuelStart { duel: Duel },
    TestResult(TestResultPush),
    DuelEnd {
        results: Option<DuelResult>,
        is_timeout: bool,
    },
    Error { message: String },
    AiStart,
    AiCodingProcess { script: AiScript },
    AiProgress {
        code_chunk: Option<String>,
        progress: Option<f64>,
    },
    AiDelete { char_count: usize },
    AiSolved,
    AiGaveUp,
    AiStruggling { message: Option<String> },
    GenerationStatus {
        status: String,
        stage: Option<String>,
    },
    Ping { timestamp: i64 },
    DuelCreationFailed { message: Option<String> },
    /// Unrecognized `type`; logged by the caller and otherwise ignored.
    Unknown { kind: String },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(flatten)]
    rest: serde_json::Map<String, Value>,
}

#[derive(Deserialize)]
struct DuelPayload {
    #[serde(default)]
    duel: Option<Duel>,
}

#[derive(Deserialize)]
struct MatchFoundPayload {
    duel_id: String,
}

#[derive(Deserialize)]
struct CodeUpdatePayload {
    #[serde(default)]
    sender_id: Option<String>,
    #[serde(default)]
    code: String,
}

#[derive(Deserialize)]
struct TypingStatusPayload {
    #[serde(default)]
    sender_id: Option<String>,
    #[serde(default)]
    is_typing: bool,
}

#[derive(Deserialize)]
struct DuelEndPayload {
    #[serde(default, alias = "result")]
    results: Option<DuelResult>,
    #[serde(default)]
    is_timeout: bool,
}

#[derive(Deserialize)]
struct MessagePayload {
    #[serde(default, alias = "error")]
    message: Option<String>,
}

#[derive(Deserialize)]
struct AiCodingProcessPayload {
    #[serde(alias = "actions", alias = "coding_process")]
    process: AiScript,
}

#[derive(Deserialize)]
struct AiProgressPayload {
    #[serde(default)]
    code_chunk: Option<String>,
    #[serde(default)]
    progress: Option<f64>,
}

#[derive(Deserialize)]
struct AiDeletePayload {
    char_count: usize,
}

#[derive(Deserialize)]
struct GenerationStatusPayload {
    #[serde(default)]
    status: String,
    #[serde(default)]
    stage: Option<String>,
}

#[derive(Deserialize)]
struct PingPayload {
    timestamp: i64,
}

impl ServerEvent {
    /// Parses a raw inbound frame into a classified event.
    ///
    /// Returns `Err` only when the frame is not a JSON envelope at all;
    /// a recognized `type` with a malformed payload also maps to `Err` so
    /// the caller can log and skip it. An unrecognized `type` is `Ok` with
    /// [`ServerEvent::Unknown`].
    pub fn parse(text: &str) -> Result<ServerEvent, serde_json::Error> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let payload = match envelope.data {
            Some(data) => data,
            None => Value::Object(envelope.rest),
        };
        Self::classify(&envelope.kind, payload)
    }

    fn classify(kind: &str, payload: Value) -> Result<ServerEvent, serde_json::Error> {
        fn from<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, serde_json::Error> {
            serde_json::from_value(payload)
        }

        let event = match kind {
            "player_joined" => ServerEvent::PlayerJoined {
                duel: parse_duel_required(payload)?,
            },
            "player_left" => ServerEvent::PlayerLeft {
                duel: parse_duel_required(payload)?,
            },
            "player_ready_changed" => ServerEvent::PlayerReadyChanged {
                duel: parse_duel_required(payload)?,
            },
            "match_found" => {
                let p: MatchFoundPayload = from(payload)?;
                ServerEvent::MatchFound { duel_id: p.duel_id }
            }
            "problem_generated" => ServerEvent::ProblemGenerated,
            "code_update" => {
                let p: CodeUpdatePayload = from(payload)?;
                ServerEvent::CodeUpdate {
                    sender_id: p.sender_id,
                    code: p.code,
                }
            }
            "typing_status" => {
                let p: TypingStatusPayload = from(payload)?;
                ServerEvent::TypingStatus {
                    sender_id: p.sender_id,
                    is_typing: p.is_typing,
                }
            }
            "duel_state" => ServerEvent::DuelState {
                duel: parse_duel_optional(payload),
            },
            "duel_update" => ServerEvent::DuelUpdate {
                duel: parse_duel_optional(payload),
            },
            "duel_start" => ServerEvent::DuelStart {
                duel: parse_duel_required(payload)?,
            },
            "test_result" => ServerEvent::TestResult(from(payload)?),
            "duel_end" => {
                let p: DuelEndPayload = from(payload)?;
                ServerEvent::DuelEnd {
                    results: p.results,
                    is_timeout: p.is_timeout,
                }
            }
            "error" => {
                let p: MessagePayload = from(payload)?;
                ServerEvent::Error {
                    message: p.message.unwrap_or_else(|| "unknown server error".to_string()),
                }
            }
            "ai_start" => ServerEvent::AiStart,
            "ai_coding_process" => {
                let p: AiCodingProcessPayload = from(payload)?;
                ServerEvent::AiCodingProcess { script: p.process }
            }
            "ai_progress" => {
                let p: AiProgressPayload = from(payload)?;
                ServerEvent::AiProgress {
                    code_chunk: p.code_chunk,
                    progress: p.progress,
                }
            }
            "ai_delete" => {
                let p: AiDeletePayload = from(payload)?;
                ServerEvent::AiDelete {
                    char_count: p.char_count,
                }
            }
            "ai_solved" => ServerEvent::AiSolved,
            "ai_gave_up" => ServerEvent::AiGaveUp,
            "ai_struggling" => {
                let p: MessagePayload = from(payload)?;
                ServerEvent::AiStruggling { message: p.message }
            }
            "generation_status" => {
                let p: GenerationStatusPayload = from(payload)?;
                ServerEvent::GenerationStatus {
                    status: p.status,
                    stage: p.stage,
                }
            }
            "ping" => {
                let p: PingPayload = from(payload)?;
                ServerEvent::Ping {
                    timestamp: p.timestamp,
                }
            }
            "duel_creation_failed" => {
                let p: MessagePayload = from(payload)?;
                ServerEvent::DuelCreationFailed { message: p.message }
            }
            other => ServerEvent::Unknown {
                kind: other.to_string(),
            },
        };
        Ok(event)
    }
}

/// A duel push either nests the object under `duel` or is the object itself.
fn parse_duel_optional(payload: Value) -> Option<Duel> {
    if let Ok(p) = serde_json::from_value::<DuelPayload>(payload.clone()) {
        if p.duel.is_some() {
            return p.duel;
        }
    }
    serde_json::from_value::<Duel>(payload).ok()
}

fn parse_duel_required(payload: Value) -> Result<Duel, serde_json::Error> {
    if let Some(duel) = parse_duel_optional(payload.clone()) {
        return Ok(duel);
    }
    // Surface the direct-object parse error for diagnostics.
    serde_json::from_value::<Duel>(payload)
}

/// Outbound messages over the duel channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    CodeUpdate { code: String, sender_id: String },
    TypingStatus { is_typing: bool, sender_id: String },
    SetReady { is_ready: bool },
    StartDuel,
    Pong { data: PongData },
}

/// Pong payload echoing the received ping timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PongData {
    pub timestamp: i64,
}

impl ClientMessage {
    pub fn pong(timestamp: i64) -> Self {
        ClientMessage::Pong {
            data: PongData { timestamp },
        }
    }
}
