//! # duel-proto
//!
//! Wire-level types for the BattleStack duel realtime protocol.
//!
//! This crate defines the shared vocabulary between the duel client and the
//! BattleStack server:
//! - The `Duel` aggregate and its embedded types (problem, result, languages)
//! - The realtime message taxonomy (inbound [`ServerEvent`], outbound
//!   [`ClientMessage`])
//! - The scripted AI coding process ([`AiScript`])
//! - The three submission-result wire shapes and the total adapter into the
//!   one canonical [`SubmissionResult`]
//!
//! It carries no IO; the client crate owns transports, storage, and timers.

pub mod ai;
pub mod duel;
pub mod message;
pub mod submission;

pub use ai::{AiAction, AiScript};
pub use duel::{
    AI_PLAYER_ID, Duel, DuelResult, DuelStatus, PlayerResult, Problem, SupportedLanguage, TestCase,
};
pub use message::{AiStatus, ClientMessage, ServerEvent};
pub use submission::{DuelTestResponse, SubmissionResponse, SubmissionResult, TestResultPush};
