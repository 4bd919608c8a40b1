//! The duel session: the aggregate state machine behind the arena view.
//!
//! Composes the scratch store, the AI typing simulator, the REST client,
//! and the realtime channel into one operation surface. All shared state
//! lives behind the cheaply cloneable [`DuelSession`] handle; background
//! work (channel task, elapsed clock, snapshot poll, matchmaking poll) is
//! owned as `JoinHandle`s and torn down on disconnect, duel switch, or
//! drop. Async continuations read current state from the session at
//! continuation time and carry the connection epoch they were spawned
//! under, so a stale continuation can never touch a successor connection.

use crate::api::{DuelApi, HttpDuelApi};
use crate::channel::{
    ConnectionState, SUBSTANTIAL_CODE_LEN, TransportFactory, WsTransportFactory, run_channel,
};
use crate::config::{ClientConfig, Identity};
use crate::error::{DuelClientError, Result};
use crate::events::{Route, UiEvent};
use crate::language::derive_initial_language;
use crate::scratch::{ScratchKeys, ScratchStore};
use crate::simulator::{OpponentState, TypingSimulator, TypingTiming, reconstruct_buffer};
use chrono::{DateTime, Utc};
use duel_proto::{
    AiScript, AiStatus, ClientMessage, Duel, DuelResult, DuelStatus, SubmissionResult,
    SupportedLanguage,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Mutable session state. Guarded by a sync lock; never held across await.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub duel_id: Option<String>,
    pub keys: Option<ScratchKeys>,
    pub connection: Option<ConnectionState>,
    /// True while a client-initiated close is in flight; suppresses the
    /// "connection lost" notification.
    pub closing: bool,
    pub duel: Option<Duel>,
    pub results: Option<DuelResult>,
    pub language: Option<SupportedLanguage>,
    /// Guards language derivation: once a language is set (derived or
    /// user-chosen), server pushes never clobber it.
    pub language_set: bool,
    pub submission_result: Option<SubmissionResult>,
    pub generation_status: Option<String>,
    pub loading: bool,
    pub last_error: Option<String>,
    pub cached_script: Option<AiScript>,
}

#[derive(Default)]
struct TaskSet {
    channel: Option<JoinHandle<()>>,
    clock: Option<JoinHandle<()>>,
    snapshot_poll: Option<JoinHandle<()>>,
    matchmaking_poll: Option<JoinHandle<()>>,
}

impl TaskSet {
    fn abort_all(&mut self) {
        for handle in [
            self.channel.take(),
            self.clock.take(),
            self.snapshot_poll.take(),
            self.matchmaking_poll.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

pub(crate) struct SessionInner {
    config: ClientConfig,
    identity: Option<Identity>,
    api: Arc<dyn DuelApi>,
    factory: Arc<dyn TransportFactory>,
    store: ScratchStore,
    opponent: Arc<OpponentState>,
    simulator: TypingSimulator,
    state: RwLock<SessionState>,
    elapsed_seconds: AtomicU64,
    /// Bumped on every connect and teardown; spawned work checks it before
    /// touching state.
    epoch: AtomicU64,
    ui_tx: mpsc::UnboundedSender<UiEvent>,
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
    tasks: Mutex<TaskSet>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.abort_all();
        }
    }
}

/// Handle to one duel session. Clones share all state.
#[derive(Clone)]
pub struct DuelSession {
    inner: Arc<SessionInner>,
}

impl DuelSession {
    /// Production constructor: HTTP API + WebSocket transport.
    ///
    /// Returns the session and the receiver for UI-facing events
    /// (notifications, navigation, submission results).
    pub fn new(
        config: ClientConfig,
        identity: Option<Identity>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<UiEvent>)> {
        let token = identity
            .as_ref()
            .map(|i| i.token.clone())
            .unwrap_or_default();
        let api = Arc::new(HttpDuelApi::new(&config, token)?);
        Ok(Self::with_components(
            config,
            identity,
            api,
            Arc::new(WsTransportFactory),
        ))
    }

    /// Dependency-injecting constructor; tests pass mock implementations.
    pub fn with_components(
        config: ClientConfig,
        identity: Option<Identity>,
        api: Arc<dyn DuelApi>,
        factory: Arc<dyn TransportFactory>,
    ) -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let store = ScratchStore::new(config.scratch_dir.clone());
        let opponent = Arc::new(OpponentState::default());
        let timing = TypingTiming {
            type_base_delay: config.type_base_delay,
            delete_delay: config.delete_delay,
        };
        let simulator = TypingSimulator::new(Arc::clone(&opponent), store.clone(), timing);

        let inner = Arc::new(SessionInner {
            config,
            identity,
            api,
            factory,
            store,
            opponent,
            simulator,
            state: RwLock::new(SessionState::default()),
            elapsed_seconds: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            ui_tx,
            outbound: Mutex::new(None),
            tasks: Mutex::new(TaskSet::default()),
        });
        (Self { inner }, ui_rx)
    }

    /// Opens the realtime channel for a duel. Refuses without an identity.
    /// Switching duels tears the previous connection down first.
    pub async fn connect(&self, duel_id: &str) -> Result<()> {
        SessionInner::connect(&self.inner, duel_id).await
    }

    /// Closes the channel and cancels every timer. Idempotent; a second
    /// call is a no-op.
    pub fn disconnect(&self) {
        self.inner.teardown();
    }

    /// Coarse pre-duel poll: watches for a matchmaking assignment and
    /// navigates to the arena once one exists. Stopped by `duel_start`,
    /// `match_found`, or disconnect.
    pub fn start_polling_for_duel(&self, user_id: &str) {
        self.inner.start_matchmaking_poll(user_id);
    }

    /// Broadcasts the user's editor content and persists it as the draft.
    pub fn send_code_update(&self, code: &str) {
        let inner = &self.inner;
        if let Some(keys) = inner.keys() {
            if let Err(err) = inner.store.save_user_code(&keys, code) {
                warn!(error = %err, "failed to persist user code");
            }
        }
        if let Some(identity) = &inner.identity {
            inner.send_message(ClientMessage::CodeUpdate {
                code: code.to_string(),
                sender_id: identity.user_id.clone(),
            });
        }
    }

    pub fn send_typing_status(&self, is_typing: bool) {
        if let Some(identity) = &self.inner.identity {
            self.inner.send_message(ClientMessage::TypingStatus {
                is_typing,
                sender_id: identity.user_id.clone(),
            });
        }
    }

    pub fn send_ready_state(&self, is_ready: bool) {
        self.inner
            .send_message(ClientMessage::SetReady { is_ready });
    }

    pub fn send_start_duel(&self) {
        self.inner.send_message(ClientMessage::StartDuel);
    }

    /// The user's persisted draft for the current duel, if any.
    pub fn saved_user_code(&self) -> Option<String> {
        let keys = self.inner.keys()?;
        self.inner.store.load_user_code(&keys)
    }

    /// Submits the solution. The HTTP reply is advisory only; the result
    /// of record arrives as a realtime `test_result`/`duel_end` push.
    pub async fn submit_solution(&self, code: &str) -> Result<()> {
        let inner = &self.inner;
        let (duel_id, language_id) = inner.submission_target()?;
        if !inner.try_begin_loading() {
            debug!("submission already in flight, ignoring");
            return Ok(());
        }
        let outcome = inner.api.submit_solution(&duel_id, code, &language_id).await;
        inner.set_loading(false);
        match outcome {
            Ok(_advisory) => {
                inner.notify(UiEvent::info("Solution submitted, judging..."));
                Ok(())
            }
            Err(err) => {
                inner.notify(UiEvent::error(format!("Submission failed: {err}")));
                Err(err)
            }
        }
    }

    /// Runs the public tests and publishes the adapted result.
    pub async fn run_tests(&self, code: &str) -> Result<()> {
        let inner = &self.inner;
        let (duel_id, language_id) = inner.submission_target()?;
        if !inner.try_begin_loading() {
            debug!("a run is already in flight, ignoring");
            return Ok(());
        }
        let outcome = inner.api.run_tests(&duel_id, code, &language_id).await;
        inner.set_loading(false);
        match outcome {
            Ok(response) => {
                inner.publish_submission_result(SubmissionResult::from(response));
                Ok(())
            }
            Err(err) => {
                // The previous result, if any, stays intact.
                inner.notify(UiEvent::error(format!("Test run failed: {err}")));
                Err(err)
            }
        }
    }

    /// Explicit user language choice; never overridden afterwards.
    pub fn set_language(&self, language: SupportedLanguage) {
        let mut state = self.inner.state.write().expect("session state lock");
        state.language = Some(language);
        state.language_set = true;
    }

    // ---- Read accessors ----

    pub fn connection_state(&self) -> ConnectionState {
        self.inner
            .state
            .read()
            .expect("session state lock")
            .connection
            .unwrap_or(ConnectionState::Closed)
    }

    pub fn duel(&self) -> Option<Duel> {
        self.inner
            .state
            .read()
            .expect("session state lock")
            .duel
            .clone()
    }

    pub fn results(&self) -> Option<DuelResult> {
        self.inner
            .state
            .read()
            .expect("session state lock")
            .results
            .clone()
    }

    pub fn language(&self) -> Option<SupportedLanguage> {
        self.inner
            .state
            .read()
            .expect("session state lock")
            .language
            .clone()
    }

    pub fn submission_result(&self) -> Option<SubmissionResult> {
        self.inner
            .state
            .read()
            .expect("session state lock")
            .submission_result
            .clone()
    }

    pub fn generation_status(&self) -> Option<String> {
        self.inner
            .state
            .read()
            .expect("session state lock")
            .generation_status
            .clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner
            .state
            .read()
            .expect("session state lock")
            .last_error
            .clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.read().expect("session state lock").loading
    }

    pub fn opponent_code(&self) -> String {
        self.inner.opponent.code()
    }

    pub fn opponent_typing(&self) -> bool {
        self.inner.opponent.is_typing()
    }

    pub fn opponent_progress(&self) -> f64 {
        self.inner.opponent.progress()
    }

    pub fn ai_status(&self) -> AiStatus {
        self.inner.opponent.status()
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.inner.elapsed_seconds.load(Ordering::Acquire)
    }
}

impl SessionInner {
    pub(crate) async fn connect(self: &Arc<Self>, duel_id: &str) -> Result<()> {
        let Some(identity) = self.identity.clone() else {
            let message = "Cannot join duel: not signed in";
            self.set_error(message);
            self.notify(UiEvent::error(message));
            return Err(DuelClientError::MissingCredential);
        };

        // Duel switch: tear the previous connection and timers down first.
        self.teardown();
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;

        let keys = ScratchKeys::new(duel_id, Some(&identity.user_id));
        {
            let mut state = self.state.write().expect("session state lock");
            *state = SessionState {
                duel_id: Some(duel_id.to_string()),
                keys: Some(keys.clone()),
                connection: Some(ConnectionState::Connecting),
                ..SessionState::default()
            };
        }
        self.opponent.reset();
        self.elapsed_seconds.store(0, Ordering::Release);
        self.resume_from_scratch(&keys);

        let url = self.config.ws_url(duel_id, &identity.token);
        info!(duel_id, "connecting duel realtime channel");
        let transport = match self.factory.connect(&url).await {
            Ok(transport) => transport,
            Err(err) => {
                self.state.write().expect("session state lock").connection =
                    Some(ConnectionState::Closed);
                self.set_error(&err.to_string());
                self.notify(UiEvent::error(format!("Failed to connect to duel: {err}")));
                return Err(err);
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        *self.outbound.lock().expect("outbound lock") = Some(outbound_tx);
        self.state.write().expect("session state lock").connection = Some(ConnectionState::Open);

        let channel = tokio::spawn(run_channel(Arc::clone(self), epoch, transport, outbound_rx));
        self.tasks.lock().expect("task lock").channel = Some(channel);

        // The snapshot is the source of truth for anything the channel has
        // not pushed yet.
        self.spawn_snapshot_fetch();
        Ok(())
    }

    /// Client-initiated teardown: cancels the simulator, all timers, and
    /// the channel task. Safe to call repeatedly.
    pub(crate) fn teardown(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.simulator.cancel();
        self.state.write().expect("session state lock").closing = true;
        // Dropping the sender lets a healthy channel task close the
        // transport cleanly on its own; abort covers one stuck mid-read.
        *self.outbound.lock().expect("outbound lock") = None;
        self.tasks.lock().expect("task lock").abort_all();
        let mut state = self.state.write().expect("session state lock");
        state.connection = Some(ConnectionState::Closed);
        state.closing = false;
    }

    /// Called by the channel task when its connection ends.
    pub(crate) fn on_channel_closed(&self, epoch: u64, clean: bool) {
        if self.epoch.load(Ordering::Acquire) != epoch {
            // A successor connection owns the state now.
            return;
        }
        self.simulator.cancel();
        *self.outbound.lock().expect("outbound lock") = None;
        {
            let mut tasks = self.tasks.lock().expect("task lock");
            tasks.channel = None;
            if let Some(clock) = tasks.clock.take() {
                clock.abort();
            }
            if let Some(poll) = tasks.snapshot_poll.take() {
                poll.abort();
            }
        }
        let closing = {
            let mut state = self.state.write().expect("session state lock");
            let closing = state.closing;
            state.connection = Some(ConnectionState::Closed);
            state.closing = false;
            closing
        };
        if !clean && !closing {
            warn!("duel channel closed unexpectedly");
            self.set_error("Connection to duel lost");
            self.notify(UiEvent::error("Connection to duel lost"));
        }
    }

    /// Seeds opponent state from persisted scratch and resumes the typing
    /// animation at the last step boundary.
    fn resume_from_scratch(&self, keys: &ScratchKeys) {
        if !self.store.has_any(keys) {
            return;
        }
        let script = self.store.load_script(keys);
        let progress = self.store.load_progress(keys);

        // Prefer the persisted buffer; reconstruct from the script only
        // when none was saved, then persist so future resumes are direct.
        let buffer = self.store.load_ai_code(keys).or_else(|| {
            let (script, progress) = (script.as_ref()?, progress?);
            let rebuilt = reconstruct_buffer(script, progress);
            if let Err(err) = self.store.save_ai_code(keys, &rebuilt) {
                warn!(error = %err, "failed to persist reconstructed AI buffer");
            }
            Some(rebuilt)
        });

        if let Some(buffer) = buffer {
            debug!(len = buffer.len(), "resuming opponent buffer from scratch");
            self.opponent.set_code(buffer);
        }
        if let Some(progress) = progress {
            self.opponent.set_progress(progress);
        }
        self.state.write().expect("session state lock").cached_script = script.clone();

        if let (Some(script), Some(progress)) = (script, progress) {
            if progress < 100.0 && !script.is_empty() {
                self.opponent.set_status(AiStatus::Typing);
                self.simulator.start(script, progress, keys.clone());
            } else if progress >= 100.0 {
                self.opponent.set_finished(true);
                self.opponent.set_status(AiStatus::Solved);
            }
        }
    }

    /// Replaces the cached duel and runs the follow-ups a fresh snapshot
    /// implies: one-shot language derivation, elapsed clock management,
    /// preparing-status polling.
    pub(crate) async fn apply_snapshot(self: &Arc<Self>, duel: Duel) {
        let needs_language = {
            let mut state = self.state.write().expect("session state lock");
            if let Some(results) = duel.results.clone() {
                state.results = Some(results);
            }
            let needs_language = !state.language_set && duel.problem.is_some();
            state.duel = Some(duel.clone());
            needs_language
        };

        if needs_language {
            match self.api.supported_languages().await {
                Ok(languages) => {
                    let mut state = self.state.write().expect("session state lock");
                    // Re-check: the user may have chosen while we fetched.
                    if !state.language_set {
                        let derived = state
                            .duel
                            .as_ref()
                            .and_then(|duel| duel.problem.as_ref())
                            .and_then(|problem| derive_initial_language(problem, &languages));
                        if let Some(language) = derived {
                            debug!(language = %language.id, "derived initial language");
                            state.language = Some(language);
                            state.language_set = true;
                        }
                    }
                }
                Err(err) => {
                    self.notify(UiEvent::error(format!("Failed to load languages: {err}")));
                }
            }
        }

        self.update_clock(&duel);
        if duel.status.is_preparing() {
            self.ensure_snapshot_poll();
        }
    }

    fn update_clock(self: &Arc<Self>, duel: &Duel) {
        if duel.status == DuelStatus::InProgress {
            if let Some(started_at) = duel.started_at.as_deref().and_then(parse_timestamp) {
                self.start_clock(started_at);
            }
            return;
        }

        if duel.status.is_terminal() {
            if let Some(clock) = self.tasks.lock().expect("task lock").clock.take() {
                clock.abort();
            }
            let started = duel.started_at.as_deref().and_then(parse_timestamp);
            let finished = duel.finished_at.as_deref().and_then(parse_timestamp);
            if let (Some(started), Some(finished)) = (started, finished) {
                let elapsed = (finished - started).num_seconds().max(0) as u64;
                self.elapsed_seconds.store(elapsed, Ordering::Release);
            }
        }
    }

    /// Starts the one-second elapsed clock if it is not already running.
    /// Each tick recomputes from the wall-clock start, so missed ticks
    /// never accumulate drift.
    fn start_clock(self: &Arc<Self>, started_at: DateTime<Utc>) {
        let mut tasks = self.tasks.lock().expect("task lock");
        if tasks.clock.is_some() {
            return;
        }
        let weak = Arc::downgrade(self);
        let epoch = self.epoch.load(Ordering::Acquire);
        tasks.clock = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let Some(inner) = weak.upgrade() else { return };
                if inner.epoch.load(Ordering::Acquire) != epoch {
                    return;
                }
                let elapsed = (Utc::now() - started_at).num_seconds().max(0) as u64;
                inner.elapsed_seconds.store(elapsed, Ordering::Release);
            }
        }));
    }

    /// One-shot snapshot refresh for the current duel.
    pub(crate) fn spawn_snapshot_fetch(self: &Arc<Self>) {
        let Some(duel_id) = self
            .state
            .read()
            .expect("session state lock")
            .duel_id
            .clone()
        else {
            return;
        };
        let weak = Arc::downgrade(self);
        let epoch = self.epoch.load(Ordering::Acquire);
        tokio::spawn(async move {
            let Some(inner) = weak.upgrade() else { return };
            let outcome = inner.api.get_duel(&duel_id).await;
            // A teardown during the fetch makes either outcome stale; a
            // late failure must not surface as an error notice.
            if inner.epoch.load(Ordering::Acquire) != epoch {
                return;
            }
            match outcome {
                Ok(duel) => inner.apply_snapshot(duel).await,
                Err(err) => {
                    warn!(duel_id = %duel_id, error = %err, "duel snapshot fetch failed");
                    inner.notify(UiEvent::error(format!("Failed to load duel: {err}")));
                }
            }
        });
    }

    /// Polls the snapshot while the duel is still preparing (pending or
    /// generating its problem). Self-terminates on the first snapshot past
    /// the preparing phase.
    fn ensure_snapshot_poll(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().expect("task lock");
        if tasks.snapshot_poll.is_some() {
            return;
        }
        let weak = Arc::downgrade(self);
        let epoch = self.epoch.load(Ordering::Acquire);
        let interval = self.config.snapshot_poll_interval;
        tasks.snapshot_poll = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else { return };
                if inner.epoch.load(Ordering::Acquire) != epoch {
                    return;
                }
                let Some(duel_id) = inner
                    .state
                    .read()
                    .expect("session state lock")
                    .duel_id
                    .clone()
                else {
                    return;
                };
                match inner.api.get_duel(&duel_id).await {
                    Ok(duel) => {
                        let preparing = duel.status.is_preparing();
                        inner.apply_snapshot(duel).await;
                        if !preparing {
                            inner.tasks.lock().expect("task lock").snapshot_poll = None;
                            return;
                        }
                    }
                    Err(err) => {
                        debug!(duel_id = %duel_id, error = %err, "snapshot poll fetch failed, retrying");
                    }
                }
            }
        }));
    }

    /// Pre-duel matchmaking poll; restarting replaces any existing poll.
    pub(crate) fn start_matchmaking_poll(self: &Arc<Self>, user_id: &str) {
        let mut tasks = self.tasks.lock().expect("task lock");
        if let Some(previous) = tasks.matchmaking_poll.take() {
            previous.abort();
        }
        let weak = Arc::downgrade(self);
        let interval = self.config.matchmaking_poll_interval;
        let user = user_id.to_string();
        tasks.matchmaking_poll = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else { return };
                match inner.api.active_duel(&user).await {
                    Ok(Some(duel)) => {
                        info!(duel_id = %duel.id, "matchmaking assigned a duel");
                        inner.notify(UiEvent::Navigate(Route::Arena(duel.id.clone())));
                        inner.tasks.lock().expect("task lock").matchmaking_poll = None;
                        return;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        // Transient; the next tick retries.
                        debug!(error = %err, "matchmaking poll failed");
                    }
                }
            }
        }));
    }

    pub(crate) fn stop_matchmaking_poll(&self) {
        if let Some(poll) = self
            .tasks
            .lock()
            .expect("task lock")
            .matchmaking_poll
            .take()
        {
            poll.abort();
        }
    }

    /// Handles an incoming AI typing script.
    ///
    /// A duplicate of the script already animating (same length and first
    /// action), or any script arriving once the visible buffer is already
    /// substantial, must not reset that buffer: re-broadcasts and late
    /// script swaps would otherwise throw away visible progress. The
    /// incoming script is still persisted and cached. Only over a trivial
    /// buffer does a fresh script replace the animation from scratch.
    pub(crate) fn handle_ai_script(&self, script: AiScript) {
        let Some(keys) = self.keys() else {
            warn!("ai script received outside an active duel, ignoring");
            return;
        };

        let known = {
            let state = self.state.read().expect("session state lock");
            state
                .cached_script
                .as_ref()
                .is_some_and(|cached| cached.matches(&script))
        } || self
            .store
            .load_script(&keys)
            .is_some_and(|stored| stored.matches(&script));

        if known || self.persisted_opponent_code_len() >= SUBSTANTIAL_CODE_LEN {
            debug!("ai script arrived over an in-flight animation, keeping buffer");
            if let Err(err) = self.store.save_script(&keys, &script) {
                warn!(error = %err, "failed to persist ai script");
            }
            self.state.write().expect("session state lock").cached_script = Some(script);
            self.opponent.set_status(AiStatus::Typing);
            return;
        }

        if let Err(err) = self.store.save_script(&keys, &script) {
            warn!(error = %err, "failed to persist ai script");
        }
        if let Err(err) = self.store.save_progress(&keys, 0.0) {
            warn!(error = %err, "failed to persist ai progress");
        }
        if let Err(err) = self.store.save_ai_code(&keys, "") {
            warn!(error = %err, "failed to persist ai buffer");
        }

        self.opponent.set_code(String::new());
        self.opponent.set_progress(0.0);
        self.opponent.set_finished(false);
        self.opponent.set_status(AiStatus::Typing);
        self.state.write().expect("session state lock").cached_script = Some(script.clone());
        // start() cancels any prior animation via the generation counter.
        self.simulator.start(script, 0.0, keys);
    }

    /// Terminal wrap-up shared by `duel_end` and terminal snapshots:
    /// freezes the clock, cancels the animation, clears scratch, and
    /// navigates to the completion view.
    pub(crate) fn finish_terminal(&self, results: Option<DuelResult>, is_timeout: bool) {
        self.simulator.cancel();
        self.opponent.set_typing(false);
        {
            let mut tasks = self.tasks.lock().expect("task lock");
            if let Some(clock) = tasks.clock.take() {
                clock.abort();
            }
            if let Some(poll) = tasks.snapshot_poll.take() {
                poll.abort();
            }
        }

        let (duel_id, keys) = {
            let mut state = self.state.write().expect("session state lock");
            if let Some(results) = results {
                state.results = Some(results);
            }
            if let Some(duel) = state.duel.as_mut() {
                if is_timeout {
                    duel.status = DuelStatus::TimedOut;
                } else if !duel.status.is_terminal() {
                    duel.status = DuelStatus::Completed;
                }
            }
            state.cached_script = None;
            state.generation_status = None;
            (state.duel_id.clone(), state.keys.clone())
        };

        if let Some(keys) = keys {
            self.store.clear_all(&keys);
        }
        if is_timeout {
            self.notify(UiEvent::warning("Time's up!"));
        }
        if let Some(duel_id) = duel_id {
            self.notify(UiEvent::Navigate(Route::Completion(duel_id)));
        }
    }

    pub(crate) fn publish_submission_result(&self, result: SubmissionResult) {
        self.state
            .write()
            .expect("session state lock")
            .submission_result = Some(result.clone());
        self.notify(UiEvent::SubmissionResult(result));
    }

    /// Queues an outbound message; silently dropped when no channel is
    /// open, matching fire-and-forget send semantics.
    pub(crate) fn send_message(&self, message: ClientMessage) {
        let outbound = self.outbound.lock().expect("outbound lock");
        match outbound.as_ref() {
            Some(sender) => {
                if sender.send(message).is_err() {
                    warn!("outbound channel gone, dropping message");
                }
            }
            None => warn!("no open channel, dropping outbound message"),
        }
    }

    pub(crate) fn notify(&self, event: UiEvent) {
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.ui_tx.send(event);
    }

    pub(crate) fn is_self(&self, sender_id: Option<&str>) -> bool {
        match (sender_id, &self.identity) {
            (Some(sender), Some(identity)) => sender == identity.user_id,
            _ => false,
        }
    }

    pub(crate) fn opponent(&self) -> &Arc<OpponentState> {
        &self.opponent
    }

    pub(crate) fn persist_opponent_code(&self) {
        if let Some(keys) = self.keys() {
            if let Err(err) = self.store.save_ai_code(&keys, &self.opponent.code()) {
                warn!(error = %err, "failed to persist opponent code");
            }
        }
    }

    pub(crate) fn persist_opponent_progress(&self, progress: f64) {
        if let Some(keys) = self.keys() {
            if let Err(err) = self.store.save_progress(&keys, progress) {
                warn!(error = %err, "failed to persist opponent progress");
            }
        }
    }

    /// Length of the opponent buffer, counting whichever of the live and
    /// persisted copies is longer.
    pub(crate) fn persisted_opponent_code_len(&self) -> usize {
        let live = self.opponent.code_len();
        let persisted = self
            .keys()
            .and_then(|keys| self.store.load_ai_code(&keys))
            .map_or(0, |code| code.len());
        live.max(persisted)
    }

    pub(crate) fn set_error(&self, message: &str) {
        self.state.write().expect("session state lock").last_error = Some(message.to_string());
    }

    pub(crate) fn set_generation_status(&self, status: &str) {
        self.state
            .write()
            .expect("session state lock")
            .generation_status = Some(status.to_string());
    }

    pub(crate) fn set_loading(&self, loading: bool) {
        self.state.write().expect("session state lock").loading = loading;
    }

    /// Sets the loading flag unless a request already holds it.
    fn try_begin_loading(&self) -> bool {
        let mut state = self.state.write().expect("session state lock");
        if state.loading {
            return false;
        }
        state.loading = true;
        true
    }

    fn keys(&self) -> Option<ScratchKeys> {
        self.state.read().expect("session state lock").keys.clone()
    }

    fn submission_target(&self) -> Result<(String, String)> {
        let state = self.state.read().expect("session state lock");
        let duel_id = state.duel_id.clone().ok_or(DuelClientError::NotConnected)?;
        let language_id = state
            .language
            .as_ref()
            .map(|language| language.id.clone())
            .ok_or_else(|| DuelClientError::Protocol("no language selected".to_string()))?;
        Ok((duel_id, language_id))
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .ok()
}
