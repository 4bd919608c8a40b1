//! The duel realtime channel.
//!
//! One WebSocket connection per active duel, behind a [`DuelTransport`] /
//! [`TransportFactory`] trait pair so tests can substitute an in-memory
//! transport. The channel task owns the transport: it forwards outbound
//! messages from the session and classifies inbound frames through
//! [`dispatch_event`], which implements the full effect table of the duel
//! protocol.

use crate::error::{DuelClientError, Result};
use crate::events::{Route, UiEvent};
use crate::session::SessionInner;
use async_trait::async_trait;
use duel_proto::{AiStatus, ClientMessage, ServerEvent, SubmissionResult};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

/// Opponent code shorter than this is considered trivial; at or above it,
/// an incoming `ai_start`/`ai_coding_process` must not reset the buffer.
pub(crate) const SUBSTANTIAL_CODE_LEN: usize = 50;

/// Lifecycle of the realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
}

/// A frame as seen by the channel task.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportFrame {
    Text(String),
    /// The remote closed the stream. `clean` marks a proper close frame.
    Closed { clean: bool },
    Error(String),
}

/// One bidirectional duel connection.
#[async_trait]
pub trait DuelTransport: Send {
    async fn send(&mut self, text: String) -> Result<()>;
    /// Next inbound frame; `None` once the stream is exhausted.
    async fn recv(&mut self) -> Option<TransportFrame>;
    async fn close(&mut self);
}

/// Opens transports. Production uses [`WsTransportFactory`].
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn DuelTransport>>;
}

/// tokio-tungstenite transport.
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl DuelTransport for WsTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|err| DuelClientError::Transport(err.to_string()))
    }

    async fn recv(&mut self) -> Option<TransportFrame> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(TransportFrame::Text(text.to_string())),
                Ok(Message::Close(_)) => return Some(TransportFrame::Closed { clean: true }),
                // Transport-level pings are answered by tungstenite itself;
                // the application-level ping/pong runs over text frames.
                Ok(_) => continue,
                Err(err) => return Some(TransportFrame::Error(err.to_string())),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

/// Production factory connecting over `ws(s)://`.
#[derive(Debug, Default)]
pub struct WsTransportFactory;

#[async_trait]
impl TransportFactory for WsTransportFactory {
    async fn connect(&self, url: &str) -> Result<Box<dyn DuelTransport>> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|err| DuelClientError::Transport(err.to_string()))?;
        Ok(Box::new(WsTransport { stream }))
    }
}

/// What the channel task does after dispatching one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    Continue,
    /// Stop the channel task and close the transport cleanly.
    Close,
}

/// Reconnects to a freshly matched duel on its own task.
///
/// Kept as a plain function: spawning from inside `dispatch_event`'s async
/// body would make its future type contain `connect`'s, which transitively
/// contains this channel's, and rustc cannot resolve that cycle.
fn spawn_reconnect(session: Arc<SessionInner>, target: String) {
    tokio::spawn(async move {
        if let Err(err) = SessionInner::connect(&session, &target).await {
            warn!(error = %err, "reconnect to matched duel failed");
            session.notify(UiEvent::error(format!("Failed to join duel: {err}")));
        }
    });
}

/// Applies one classified server event to the session.
///
/// Every arm degrades gracefully; nothing here may panic or abort the
/// connection for a malformed-but-classified payload.
pub(crate) async fn dispatch_event(inner: &Arc<SessionInner>, event: ServerEvent) -> Dispatch {
    match event {
        ServerEvent::PlayerJoined { duel }
        | ServerEvent::PlayerLeft { duel }
        | ServerEvent::PlayerReadyChanged { duel } => {
            inner.apply_snapshot(duel).await;
            Dispatch::Continue
        }

        ServerEvent::MatchFound { duel_id } => {
            info!(duel_id = %duel_id, "matchmaking assigned a new duel, reconnecting");
            inner.stop_matchmaking_poll();
            spawn_reconnect(Arc::clone(inner), duel_id);
            Dispatch::Close
        }

        ServerEvent::ProblemGenerated => {
            // Signal only; the problem rides the next snapshot.
            inner.spawn_snapshot_fetch();
            Dispatch::Continue
        }

        ServerEvent::CodeUpdate { sender_id, code } => {
            if !inner.is_self(sender_id.as_deref()) {
                inner.opponent().set_code(code.clone());
                inner.persist_opponent_code();
            }
            Dispatch::Continue
        }

        ServerEvent::TypingStatus {
            sender_id,
            is_typing,
        } => {
            if !inner.is_self(sender_id.as_deref()) {
                inner.opponent().set_typing(is_typing);
            }
            Dispatch::Continue
        }

        ServerEvent::DuelState { duel } | ServerEvent::DuelUpdate { duel } => match duel {
            Some(duel) => {
                let terminal = duel.status.is_terminal();
                inner.apply_snapshot(duel).await;
                if terminal {
                    inner.finish_terminal(None, false);
                    Dispatch::Close
                } else {
                    Dispatch::Continue
                }
            }
            None => {
                // Partial push; the REST snapshot is the source of truth.
                inner.spawn_snapshot_fetch();
                Dispatch::Continue
            }
        },

        ServerEvent::DuelStart { duel } => {
            let duel_id = duel.id.clone();
            inner.stop_matchmaking_poll();
            inner.apply_snapshot(duel).await;
            inner.notify(UiEvent::Navigate(Route::Arena(duel_id)));
            Dispatch::Continue
        }

        ServerEvent::TestResult(push) => {
            inner.publish_submission_result(SubmissionResult::from(push));
            Dispatch::Continue
        }

        ServerEvent::DuelEnd {
            results,
            is_timeout,
        } => {
            inner.finish_terminal(results, is_timeout);
            Dispatch::Close
        }

        ServerEvent::Error { message } => {
            warn!(message = %message, "server pushed an error, tearing down channel");
            inner.set_error(&message);
            inner.notify(UiEvent::error(message));
            Dispatch::Close
        }

        ServerEvent::AiStart => {
            // A duplicate ai_start can race a resumed session; an already
            // substantial buffer means the animation is in flight.
            if inner.persisted_opponent_code_len() >= SUBSTANTIAL_CODE_LEN {
                inner.opponent().set_status(AiStatus::Typing);
            } else {
                inner.opponent().set_status(AiStatus::Thinking);
            }
            Dispatch::Continue
        }

        ServerEvent::AiCodingProcess { script } => {
            inner.handle_ai_script(script);
            Dispatch::Continue
        }

        ServerEvent::AiProgress {
            code_chunk,
            progress,
        } => {
            if let Some(chunk) = code_chunk {
                inner.opponent().append_code(&chunk);
                inner.persist_opponent_code();
            }
            if let Some(progress) = progress {
                inner.opponent().set_progress(progress);
                inner.persist_opponent_progress(progress);
            }
            inner.opponent().set_typing(true);
            Dispatch::Continue
        }

        ServerEvent::AiDelete { char_count } => {
            inner.opponent().truncate_tail(char_count);
            inner.persist_opponent_code();
            Dispatch::Continue
        }

        ServerEvent::AiSolved => {
            inner.opponent().set_typing(false);
            inner.opponent().set_finished(true);
            inner.opponent().set_status(AiStatus::Solved);
            inner.notify(UiEvent::warning("The AI opponent has solved the problem!"));
            Dispatch::Continue
        }

        ServerEvent::AiGaveUp => {
            inner.opponent().set_typing(false);
            inner.opponent().set_finished(true);
            inner.opponent().set_status(AiStatus::GaveUp);
            inner.notify(UiEvent::info("The AI opponent gave up."));
            Dispatch::Continue
        }

        ServerEvent::AiStruggling { message } => {
            inner.opponent().set_status(AiStatus::Struggling);
            inner.notify(UiEvent::info(
                message.unwrap_or_else(|| "The AI opponent is struggling...".to_string()),
            ));
            Dispatch::Continue
        }

        ServerEvent::GenerationStatus { status, stage } => {
            inner.set_generation_status(&status);
            if stage.as_deref() == Some("starting_ai") {
                inner.notify(UiEvent::info("The AI opponent is warming up..."));
            }
            Dispatch::Continue
        }

        ServerEvent::Ping { timestamp } => {
            // Liveness contract: unanswered pings get the connection
            // dropped server-side.
            inner.send_message(ClientMessage::pong(timestamp));
            Dispatch::Continue
        }

        ServerEvent::DuelCreationFailed { message } => {
            inner.set_loading(false);
            inner.notify(UiEvent::error(
                message.unwrap_or_else(|| "Duel creation failed".to_string()),
            ));
            Dispatch::Continue
        }

        ServerEvent::Unknown { kind } => {
            debug!(kind = %kind, "ignoring unrecognized realtime message type");
            Dispatch::Continue
        }
    }
}

/// The channel task body: pumps outbound messages and inbound frames until
/// either side closes. `epoch` identifies this connection; a successor
/// connection bumps it so a stale task cannot touch fresh session state.
pub(crate) async fn run_channel(
    inner: Arc<SessionInner>,
    epoch: u64,
    mut transport: Box<dyn DuelTransport>,
    mut outbound_rx: tokio::sync::mpsc::UnboundedReceiver<ClientMessage>,
) {
    let clean = loop {
        tokio::select! {
            maybe_message = outbound_rx.recv() => match maybe_message {
                Some(message) => {
                    match serde_json::to_string(&message) {
                        Ok(text) => {
                            if let Err(err) = transport.send(text).await {
                                warn!(error = %err, "outbound send failed");
                                break false;
                            }
                        }
                        Err(err) => warn!(error = %err, "failed to encode outbound message"),
                    }
                }
                // The session dropped its sender: client-initiated close.
                None => break true,
            },
            maybe_frame = transport.recv() => match maybe_frame {
                Some(TransportFrame::Text(text)) => {
                    match ServerEvent::parse(&text) {
                        Ok(event) => {
                            if dispatch_event(&inner, event).await == Dispatch::Close {
                                break true;
                            }
                        }
                        Err(err) => {
                            debug!(error = %err, "skipping unparseable frame");
                        }
                    }
                }
                Some(TransportFrame::Closed { clean }) => break clean,
                Some(TransportFrame::Error(err)) => {
                    warn!(error = %err, "transport error");
                    break false;
                }
                None => break false,
            },
        }
    };

    transport.close().await;
    inner.on_channel_closed(epoch, clean);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_transitions_are_closed_set() {
        // The state space is intentionally tiny; exhaustiveness here guards
        // against accidental growth.
        let all = [
            ConnectionState::Closed,
            ConnectionState::Connecting,
            ConnectionState::Open,
        ];
        assert_eq!(all.len(), 3);
    }
}
