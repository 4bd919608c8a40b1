//! AI opponent typing simulation.
//!
//! Replays a scripted [`AiScript`] as a time-driven animation against the
//! shared opponent buffer. Progress and the live buffer are persisted after
//! every completed step so a restart resumes at the last step boundary
//! instead of replaying elapsed time.
//!
//! Cancellation is a generation counter: every run captures the counter at
//! start and bails out the first time it observes a newer generation. There
//! is never more than one live animation over the buffer.

use crate::scratch::{ScratchKeys, ScratchStore};
use duel_proto::{AiAction, AiScript, AiStatus};
use rand::Rng;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Observable state of the simulated opponent, shared between the session,
/// the realtime channel, and the simulator task.
#[derive(Debug)]
pub struct OpponentState {
    code: RwLock<String>,
    progress: RwLock<f64>,
    status: RwLock<AiStatus>,
    typing: AtomicBool,
    finished: AtomicBool,
}

impl Default for OpponentState {
    fn default() -> Self {
        Self {
            code: RwLock::new(String::new()),
            progress: RwLock::new(0.0),
            status: RwLock::new(AiStatus::Idle),
            typing: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }
    }
}

impl OpponentState {
    pub fn code(&self) -> String {
        self.code.read().expect("opponent code lock").clone()
    }

    pub fn code_len(&self) -> usize {
        self.code.read().expect("opponent code lock").len()
    }

    pub fn set_code(&self, code: String) {
        *self.code.write().expect("opponent code lock") = code;
    }

    pub fn append_code(&self, chunk: &str) {
        self.code.write().expect("opponent code lock").push_str(chunk);
    }

    fn append_char(&self, ch: char) {
        self.code.write().expect("opponent code lock").push(ch);
    }

    /// Removes up to `count` characters from the tail. Over-deletion stops
    /// at empty rather than failing.
    pub fn truncate_tail(&self, count: usize) {
        let mut code = self.code.write().expect("opponent code lock");
        for _ in 0..count {
            if code.pop().is_none() {
                break;
            }
        }
    }

    pub fn progress(&self) -> f64 {
        *self.progress.read().expect("opponent progress lock")
    }

    pub fn set_progress(&self, progress: f64) {
        *self.progress.write().expect("opponent progress lock") = progress;
    }

    pub fn status(&self) -> AiStatus {
        *self.status.read().expect("opponent status lock")
    }

    pub fn set_status(&self, status: AiStatus) {
        *self.status.write().expect("opponent status lock") = status;
    }

    pub fn is_typing(&self) -> bool {
        self.typing.load(Ordering::Acquire)
    }

    pub fn set_typing(&self, typing: bool) {
        self.typing.store(typing, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn set_finished(&self, finished: bool) {
        self.finished.store(finished, Ordering::Release);
    }

    /// Clears everything back to an idle opponent.
    pub fn reset(&self) {
        self.set_code(String::new());
        self.set_progress(0.0);
        self.set_status(AiStatus::Idle);
        self.set_typing(false);
        self.set_finished(false);
    }
}

/// Timing knobs for the animation.
#[derive(Debug, Clone, Copy)]
pub struct TypingTiming {
    /// Base per-character delay before script speed scaling and jitter.
    pub type_base_delay: Duration,
    /// Fixed per-character backspacing cadence, slower than typing so the
    /// animation reads as deliberate deletion.
    pub delete_delay: Duration,
}

impl Default for TypingTiming {
    fn default() -> Self {
        Self {
            type_base_delay: Duration::from_millis(100),
            delete_delay: Duration::from_millis(150),
        }
    }
}

/// Drives the opponent buffer from a script. Cheap to clone; all clones
/// share the same generation counter and opponent state.
#[derive(Debug, Clone)]
pub struct TypingSimulator {
    opponent: Arc<OpponentState>,
    store: ScratchStore,
    timing: TypingTiming,
    generation: Arc<AtomicU64>,
}

impl TypingSimulator {
    pub fn new(opponent: Arc<OpponentState>, store: ScratchStore, timing: TypingTiming) -> Self {
        Self {
            opponent,
            store,
            timing,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn opponent(&self) -> &Arc<OpponentState> {
        &self.opponent
    }

    /// Cancels any in-flight animation without touching the buffer.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.opponent.set_typing(false);
    }

    /// Starts replaying `script` from `start_progress` (0-100), cancelling
    /// any prior run first. Resume skips whole completed steps; partial
    /// progress inside a step is not replayed.
    pub fn start(&self, script: AiScript, start_progress: f64, keys: ScratchKeys) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let simulator = self.clone();

        let len = script.len();
        let start_index = step_index_for(start_progress, len);
        debug!(
            steps = len,
            start_index, start_progress, "starting AI typing animation"
        );

        tokio::spawn(async move {
            simulator.run(script, start_index, generation, keys).await;
        });
    }

    fn cancelled(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) != generation
    }

    async fn run(self, script: AiScript, start_index: usize, generation: u64, keys: ScratchKeys) {
        let len = script.len();
        if len == 0 {
            self.finish(&keys);
            return;
        }

        self.opponent.set_status(AiStatus::Typing);
        self.opponent.set_finished(false);

        for (index, action) in script.actions().iter().enumerate().skip(start_index) {
            if self.cancelled(generation) {
                return;
            }
            match action {
                AiAction::Type { content, speed } => {
                    self.opponent.set_typing(true);
                    let per_char = self.timing.type_base_delay.as_secs_f64() / speed.max(0.1);
                    for ch in content.chars() {
                        tokio::time::sleep(Duration::from_secs_f64(per_char * jitter(0.8, 1.2)))
                            .await;
                        if self.cancelled(generation) {
                            return;
                        }
                        self.opponent.append_char(ch);
                    }
                }
                AiAction::Pause { duration } => {
                    self.opponent.set_typing(false);
                    tokio::time::sleep(Duration::from_secs_f64(
                        duration.max(0.0) * jitter(0.5, 1.5),
                    ))
                    .await;
                    if self.cancelled(generation) {
                        return;
                    }
                    self.opponent.set_typing(true);
                }
                AiAction::Delete { char_count } => {
                    self.opponent.set_typing(true);
                    for _ in 0..*char_count {
                        tokio::time::sleep(self.timing.delete_delay).await;
                        if self.cancelled(generation) {
                            return;
                        }
                        self.opponent.truncate_tail(1);
                    }
                }
            }

            // Checkpoint at every step boundary: a reload loses at most the
            // current step's effect.
            let progress = (index + 1) as f64 / len as f64 * 100.0;
            self.opponent.set_progress(progress);
            self.persist(&keys, progress);
        }

        // Linger briefly before declaring the solution finished.
        tokio::time::sleep(Duration::from_secs_f64(jitter(0.5, 1.5))).await;
        if self.cancelled(generation) {
            return;
        }
        self.finish(&keys);
    }

    fn finish(&self, keys: &ScratchKeys) {
        self.opponent.set_typing(false);
        self.opponent.set_finished(true);
        self.opponent.set_progress(100.0);
        self.persist(keys, 100.0);
    }

    fn persist(&self, keys: &ScratchKeys, progress: f64) {
        if let Err(err) = self.store.save_progress(keys, progress) {
            warn!(error = %err, "failed to persist AI progress");
        }
        if let Err(err) = self.store.save_ai_code(keys, &self.opponent.code()) {
            warn!(error = %err, "failed to persist AI code buffer");
        }
    }
}

/// Index of the first step that has not yet completed at `progress`.
pub fn step_index_for(progress: f64, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let index = (progress.clamp(0.0, 100.0) / 100.0 * len as f64).floor() as usize;
    index.min(len)
}

/// Rebuilds the opponent buffer by replaying `type`/`delete` actions of all
/// completed steps. Used on resume when no buffer snapshot was persisted;
/// the result is byte-identical to a live run truncated at the same step
/// boundary because only step-complete progress values are ever persisted.
pub fn reconstruct_buffer(script: &AiScript, progress: f64) -> String {
    let completed = step_index_for(progress, script.len());
    let mut buffer = String::new();
    for action in &script.actions()[..completed] {
        match action {
            AiAction::Type { content, .. } => buffer.push_str(content),
            AiAction::Delete { char_count } => {
                for _ in 0..*char_count {
                    if buffer.pop().is_none() {
                        break;
                    }
                }
            }
            AiAction::Pause { .. } => {}
        }
    }
    buffer
}

fn jitter(low: f64, high: f64) -> f64 {
    rand::thread_rng().gen_range(low..high)
}
