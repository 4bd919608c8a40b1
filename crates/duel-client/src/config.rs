use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Client configuration: endpoints, scratch directory, and timer cadences.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base, e.g. `https://battlestack.example.com`.
    pub api_base: String,
    /// WebSocket base, e.g. `wss://battlestack.example.com`.
    pub ws_base: String,
    /// Root directory for persisted per-duel scratch state.
    pub scratch_dir: PathBuf,
    /// Interval for re-fetching the snapshot while the duel is preparing.
    pub snapshot_poll_interval: Duration,
    /// Interval for the pre-duel matchmaking poll.
    pub matchmaking_poll_interval: Duration,
    /// Base per-character typing delay before speed scaling and jitter.
    pub type_base_delay: Duration,
    /// Per-character backspacing delay; slower than typing by design intent
    /// of the animation, fixed rather than script-scaled.
    pub delete_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000".to_string(),
            ws_base: "ws://localhost:8000".to_string(),
            scratch_dir: PathBuf::from(".battlestack/scratch"),
            snapshot_poll_interval: Duration::from_secs(2),
            matchmaking_poll_interval: Duration::from_secs(3),
            type_base_delay: Duration::from_millis(100),
            delete_delay: Duration::from_millis(150),
        }
    }
}

impl ClientConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults for anything unset. A missing `.env` file is not an error.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let defaults = Self::default();
        Self {
            api_base: env::var("BATTLESTACK_API_URL").unwrap_or(defaults.api_base),
            ws_base: env::var("BATTLESTACK_WS_URL").unwrap_or(defaults.ws_base),
            scratch_dir: env::var("BATTLESTACK_SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_dir),
            snapshot_poll_interval: env_duration_ms(
                "BATTLESTACK_SNAPSHOT_POLL_MS",
                defaults.snapshot_poll_interval,
            ),
            matchmaking_poll_interval: env_duration_ms(
                "BATTLESTACK_MATCHMAKING_POLL_MS",
                defaults.matchmaking_poll_interval,
            ),
            type_base_delay: env_duration_ms("BATTLESTACK_TYPE_DELAY_MS", defaults.type_base_delay),
            delete_delay: env_duration_ms("BATTLESTACK_DELETE_DELAY_MS", defaults.delete_delay),
        }
    }

    /// WebSocket endpoint for a duel's realtime channel.
    pub fn ws_url(&self, duel_id: &str, token: &str) -> String {
        format!(
            "{}/api/v1/duels/ws/{}?token={}",
            self.ws_base.trim_end_matches('/'),
            duel_id,
            token
        )
    }
}

fn env_duration_ms(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

/// The authenticated user on whose behalf the client acts. Connecting a
/// realtime channel is refused without one.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_url_shape() {
        let config = ClientConfig {
            ws_base: "wss://host.example/".to_string(),
            ..ClientConfig::default()
        };
        assert_eq!(
            config.ws_url("d1", "tok"),
            "wss://host.example/api/v1/duels/ws/d1?token=tok"
        );
    }

    #[test]
    fn test_defaults_are_sane() {
        let config = ClientConfig::default();
        assert_eq!(config.snapshot_poll_interval, Duration::from_secs(2));
        assert!(config.delete_delay > config.type_base_delay);
    }
}
