//! Real-time duel client for the BattleStack arena.
//!
//! Owns everything between the wire and the view: the REST client for duel
//! snapshots and submissions, the WebSocket realtime channel, the simulated
//! AI opponent animation, per-duel persisted scratch state, and the
//! [`DuelSession`] aggregate that ties them together. The consuming view
//! reads session state and reacts to [`UiEvent`]s; it never touches the
//! wire directly.

pub mod api;
pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod language;
pub mod scratch;
pub mod session;
pub mod simulator;
pub mod testing;

pub use api::{DuelApi, HttpDuelApi};
pub use channel::{ConnectionState, DuelTransport, TransportFactory, TransportFrame};
pub use config::{ClientConfig, Identity};
pub use error::{DuelClientError, Result};
pub use events::{NoticeLevel, Route, UiEvent};
pub use language::derive_initial_language;
pub use scratch::{ScratchKeys, ScratchStore};
pub use session::DuelSession;
pub use simulator::{OpponentState, TypingSimulator, TypingTiming, reconstruct_buffer};
