//! Scripted in-memory doubles for the transport and the HTTP API.
//!
//! Used by the integration tests to drive a full session without sockets:
//! the transport pair exposes the server side of the realtime channel, the
//! mock API returns canned snapshots and records every call.

use crate::api::DuelApi;
use crate::channel::{DuelTransport, TransportFactory, TransportFrame};
use crate::error::{DuelClientError, Result};
use async_trait::async_trait;
use duel_proto::{Duel, DuelTestResponse, SubmissionResponse, SupportedLanguage};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

struct MockShared {
    sent: Mutex<Vec<String>>,
    closed: AtomicBool,
}

/// The client side of an in-memory duel connection.
pub struct MockTransport {
    frames: mpsc::UnboundedReceiver<TransportFrame>,
    shared: Arc<MockShared>,
}

/// The server side: pushes frames in, observes what the client sent.
#[derive(Clone)]
pub struct MockTransportHandle {
    frames: mpsc::UnboundedSender<TransportFrame>,
    shared: Arc<MockShared>,
}

/// Builds a connected transport/handle pair.
pub fn mock_transport() -> (MockTransport, MockTransportHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(MockShared {
        sent: Mutex::new(Vec::new()),
        closed: AtomicBool::new(false),
    });
    (
        MockTransport {
            frames: rx,
            shared: Arc::clone(&shared),
        },
        MockTransportHandle { frames: tx, shared },
    )
}

impl MockTransportHandle {
    /// Delivers a raw text frame to the client.
    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.frames.send(TransportFrame::Text(text.into()));
    }

    /// Delivers a JSON value as a text frame.
    pub fn push_json(&self, value: serde_json::Value) {
        self.push_text(value.to_string());
    }

    /// Ends the stream with a close frame.
    pub fn close(&self, clean: bool) {
        let _ = self.frames.send(TransportFrame::Closed { clean });
    }

    /// Injects a transport-level error.
    pub fn fail(&self, error: impl Into<String>) {
        let _ = self.frames.send(TransportFrame::Error(error.into()));
    }

    /// Every text the client sent, oldest first.
    pub fn sent(&self) -> Vec<String> {
        self.shared.sent.lock().expect("mock sent lock").clone()
    }

    /// Sent texts parsed back to JSON for structural assertions.
    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent()
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }

    /// True once the client closed its side.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl DuelTransport for MockTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        self.shared.sent.lock().expect("mock sent lock").push(text);
        Ok(())
    }

    async fn recv(&mut self) -> Option<TransportFrame> {
        self.frames.recv().await
    }

    async fn close(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

/// Factory handing out pre-queued mock transports, recording every
/// connection URL.
#[derive(Default)]
pub struct MockTransportFactory {
    queue: Mutex<VecDeque<MockTransport>>,
    urls: Mutex<Vec<String>>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one connection and returns its server-side handle.
    pub fn queue_transport(&self) -> MockTransportHandle {
        let (transport, handle) = mock_transport();
        self.queue
            .lock()
            .expect("mock queue lock")
            .push_back(transport);
        handle
    }

    /// URLs connections were opened against, oldest first.
    pub fn connected_urls(&self) -> Vec<String> {
        self.urls.lock().expect("mock url lock").clone()
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn connect(&self, url: &str) -> Result<Box<dyn DuelTransport>> {
        self.urls
            .lock()
            .expect("mock url lock")
            .push(url.to_string());
        self.queue
            .lock()
            .expect("mock queue lock")
            .pop_front()
            .map(|transport| Box::new(transport) as Box<dyn DuelTransport>)
            .ok_or_else(|| DuelClientError::Transport("no mock transport queued".to_string()))
    }
}

/// Scripted duel API; every call is recorded by name.
#[derive(Default)]
pub struct MockDuelApi {
    duels: Mutex<HashMap<String, Duel>>,
    active: Mutex<Option<Duel>>,
    created: Mutex<Option<Duel>>,
    languages: Mutex<Vec<SupportedLanguage>>,
    submit_response: Mutex<Option<SubmissionResponse>>,
    test_response: Mutex<Option<DuelTestResponse>>,
    calls: Mutex<Vec<String>>,
}

impl MockDuelApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the snapshot returned for this duel id.
    pub fn set_duel(&self, duel: Duel) {
        self.duels
            .lock()
            .expect("mock duels lock")
            .insert(duel.id.clone(), duel);
    }

    pub fn set_active(&self, duel: Option<Duel>) {
        *self.active.lock().expect("mock active lock") = duel;
    }

    /// Reply for room/AI duel creation calls.
    pub fn set_created(&self, duel: Duel) {
        *self.created.lock().expect("mock created lock") = Some(duel);
    }

    pub fn set_languages(&self, languages: Vec<SupportedLanguage>) {
        *self.languages.lock().expect("mock languages lock") = languages;
    }

    pub fn set_submit_response(&self, response: SubmissionResponse) {
        *self.submit_response.lock().expect("mock submit lock") = Some(response);
    }

    pub fn set_test_response(&self, response: DuelTestResponse) {
        *self.test_response.lock().expect("mock test lock") = Some(response);
    }

    /// Call names in invocation order, e.g. `get_duel(d1)`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("mock calls lock").clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().expect("mock calls lock").push(call.into());
    }

    fn not_found() -> DuelClientError {
        DuelClientError::Api {
            status: 404,
            body: "not found".to_string(),
        }
    }
}

#[async_trait]
impl DuelApi for MockDuelApi {
    async fn get_duel(&self, duel_id: &str) -> Result<Duel> {
        self.record(format!("get_duel({duel_id})"));
        self.duels
            .lock()
            .expect("mock duels lock")
            .get(duel_id)
            .cloned()
            .ok_or_else(Self::not_found)
    }

    async fn active_duel(&self, user_id: &str) -> Result<Option<Duel>> {
        self.record(format!("active_duel({user_id})"));
        Ok(self.active.lock().expect("mock active lock").clone())
    }

    async fn create_ai_duel(&self) -> Result<Duel> {
        self.record("create_ai_duel");
        self.created
            .lock()
            .expect("mock created lock")
            .clone()
            .ok_or_else(Self::not_found)
    }

    async fn submit_solution(
        &self,
        duel_id: &str,
        _code: &str,
        language_id: &str,
    ) -> Result<SubmissionResponse> {
        self.record(format!("submit_solution({duel_id},{language_id})"));
        self.submit_response
            .lock()
            .expect("mock submit lock")
            .clone()
            .ok_or_else(Self::not_found)
    }

    async fn run_tests(
        &self,
        duel_id: &str,
        _code: &str,
        language_id: &str,
    ) -> Result<DuelTestResponse> {
        self.record(format!("run_tests({duel_id},{language_id})"));
        self.test_response
            .lock()
            .expect("mock test lock")
            .clone()
            .ok_or_else(Self::not_found)
    }

    async fn supported_languages(&self) -> Result<Vec<SupportedLanguage>> {
        self.record("supported_languages");
        Ok(self.languages.lock().expect("mock languages lock").clone())
    }

    async fn create_room(&self) -> Result<Duel> {
        self.record("create_room");
        self.created
            .lock()
            .expect("mock created lock")
            .clone()
            .ok_or_else(Self::not_found)
    }

    async fn join_room(&self, room_code: &str) -> Result<Duel> {
        self.record(format!("join_room({room_code})"));
        self.created
            .lock()
            .expect("mock created lock")
            .clone()
            .ok_or_else(Self::not_found)
    }
}
