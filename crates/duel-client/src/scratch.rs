//! Per-duel persisted scratch state.
//!
//! A small key-value store holding the AI script, its numeric progress, the
//! live opponent code buffer, and the user's own draft code, namespaced per
//! duel (and per user for the draft). Values survive page-reload-equivalent
//! restarts so a duel session can resume mid-animation.
//!
//! Backed by one file per key under a root directory. Corrupt or
//! unreadable values are treated as absent: the bad key is deleted and the
//! session proceeds as if nothing was persisted.

use crate::error::Result;
use duel_proto::AiScript;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

/// The fixed set of persistence keys for one (duel, user) pair.
///
/// Pure and deterministic: the same inputs always yield the same keys, and
/// distinct duel ids never collide. The user-code key exists only when a
/// user id is supplied, so distinct users on a shared device stay separate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchKeys {
    pub ai_process: String,
    pub ai_progress: String,
    pub ai_code: String,
    pub user_code: Option<String>,
}

impl ScratchKeys {
    pub fn new(duel_id: &str, user_id: Option<&str>) -> Self {
        Self {
            ai_process: format!("duel_{duel_id}_ai_process"),
            ai_progress: format!("duel_{duel_id}_ai_progress"),
            ai_code: format!("duel_{duel_id}_ai_code"),
            user_code: user_id.map(|user| format!("duel_{duel_id}_user_{user}_code")),
        }
    }

    fn all(&self) -> Vec<&str> {
        let mut keys = vec![
            self.ai_process.as_str(),
            self.ai_progress.as_str(),
            self.ai_code.as_str(),
        ];
        if let Some(user_code) = &self.user_code {
            keys.push(user_code.as_str());
        }
        keys
    }
}

/// File-per-key store rooted at a directory.
#[derive(Debug, Clone)]
pub struct ScratchStore {
    root: PathBuf,
}

impl ScratchStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Duel and user ids are opaque server strings; keep them out of
        // path semantics.
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.root.join(safe)
    }

    /// Reads a raw value. Any read failure is treated as absence.
    pub fn get(&self, key: &str) -> Option<String> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(value) => Some(value),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                debug!(key, error = %err, "scratch read failed, treating as absent");
                None
            }
        }
    }

    /// Writes a raw value, creating the root directory if needed.
    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        fs::write(self.path_for(key), value)?;
        Ok(())
    }

    /// Removes a key. Missing keys are a no-op.
    pub fn remove(&self, key: &str) {
        if let Err(err) = fs::remove_file(self.path_for(key)) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(key, error = %err, "scratch remove failed");
            }
        }
    }

    /// Removes every key in the set. Safe to call repeatedly or when
    /// nothing was ever written.
    pub fn clear_all(&self, keys: &ScratchKeys) {
        for key in keys.all() {
            self.remove(key);
        }
    }

    /// True when any key in the set currently holds a value.
    pub fn has_any(&self, keys: &ScratchKeys) -> bool {
        keys.all().iter().any(|key| self.path_for(key).exists())
    }

    /// Loads the persisted AI script. Malformed JSON deletes the key.
    pub fn load_script(&self, keys: &ScratchKeys) -> Option<AiScript> {
        let raw = self.get(&keys.ai_process)?;
        match serde_json::from_str(&raw) {
            Ok(script) => Some(script),
            Err(err) => {
                warn!(key = %keys.ai_process, error = %err, "corrupt AI script in scratch, discarding");
                self.remove(&keys.ai_process);
                None
            }
        }
    }

    pub fn save_script(&self, keys: &ScratchKeys, script: &AiScript) -> Result<()> {
        self.put(&keys.ai_process, &serde_json::to_string(script)?)
    }

    /// Loads the persisted 0-100 progress. Malformed values delete the key.
    pub fn load_progress(&self, keys: &ScratchKeys) -> Option<f64> {
        let raw = self.get(&keys.ai_progress)?;
        match raw.trim().parse::<f64>() {
            Ok(progress) if progress.is_finite() => Some(progress.clamp(0.0, 100.0)),
            _ => {
                warn!(key = %keys.ai_progress, "corrupt AI progress in scratch, discarding");
                self.remove(&keys.ai_progress);
                None
            }
        }
    }

    pub fn save_progress(&self, keys: &ScratchKeys, progress: f64) -> Result<()> {
        self.put(&keys.ai_progress, &progress.to_string())
    }

    pub fn load_ai_code(&self, keys: &ScratchKeys) -> Option<String> {
        self.get(&keys.ai_code)
    }

    pub fn save_ai_code(&self, keys: &ScratchKeys, code: &str) -> Result<()> {
        self.put(&keys.ai_code, code)
    }

    pub fn load_user_code(&self, keys: &ScratchKeys) -> Option<String> {
        keys.user_code.as_deref().and_then(|key| self.get(key))
    }

    pub fn save_user_code(&self, keys: &ScratchKeys, code: &str) -> Result<()> {
        if let Some(key) = keys.user_code.as_deref() {
            self.put(key, code)?;
        }
        Ok(())
    }
}
