//! Client configuration: baked-in defaults, optional TOML file, env overrides.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ChatError;

/// Default backend, matching the hosted mock deployment.
pub const DEFAULT_API_BASE_URL: &str = "https://mock-chat-backend.vercel.app/api";

/// Fixed reconnect backoff for the push channel. Observed values across
/// deployments ranged 2-5 s; 3 s is the recorded choice. Unconditional,
/// unbounded, not jittered.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(3);

/// Poll cadence for the timed-poll fallback channel.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// "Near the bottom" distance for the auto-scroll policy, in pixels.
pub const DEFAULT_SCROLL_THRESHOLD: u32 = 40;

/// Runtime configuration for the client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the backend API, no trailing slash.
    pub base_url: String,
    /// Fixed delay before reopening a dropped push channel.
    pub reconnect_backoff: Duration,
    /// Cadence of the poll fallback.
    pub poll_interval: Duration,
    /// Auto-scroll threshold in pixels.
    pub scroll_threshold: u32,
    /// TCP connection timeout.
    pub connect_timeout: Duration,
    /// Per-request read timeout. Does not apply to the SSE stream.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            poll_interval: DEFAULT_POLL_INTERVAL,
            scroll_threshold: DEFAULT_SCROLL_THRESHOLD,
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// On-disk shape of the optional config file. All fields optional;
/// absent fields fall back to defaults.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    base_url: Option<String>,
    reconnect_backoff_secs: Option<u64>,
    poll_interval_secs: Option<u64>,
    scroll_threshold: Option<u32>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

impl ClientConfig {
    /// Build a config from defaults, an optional TOML file, and the
    /// environment, in that precedence order (env wins).
    ///
    /// Recognized env vars: `MOCK_CHAT_API_URL`,
    /// `MOCK_CHAT_RECONNECT_SECS`, `MOCK_CHAT_POLL_SECS`.
    pub fn load(path: Option<&Path>) -> Result<Self, ChatError> {
        let mut config = Self::default();

        if let Some(path) = path {
            let raw = std::fs::read_to_string(path)?;
            let file: FileConfig = toml::from_str(&raw).map_err(|e| ChatError::Decode {
                detail: format!("config file {}: {e}", path.display()),
            })?;
            config.apply_file(file);
        }

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(url) = file.base_url {
            self.base_url = url;
        }
        if let Some(secs) = file.reconnect_backoff_secs {
            self.reconnect_backoff = Duration::from_secs(secs);
        }
        if let Some(secs) = file.poll_interval_secs {
            self.poll_interval = Duration::from_secs(secs);
        }
        if let Some(px) = file.scroll_threshold {
            self.scroll_threshold = px;
        }
        if let Some(secs) = file.connect_timeout_secs {
            self.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.request_timeout_secs {
            self.request_timeout = Duration::from_secs(secs);
        }
    }

    /// Env lookup is injected so tests stay independent of process state.
    fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(url) = get("MOCK_CHAT_API_URL") {
            self.base_url = url;
        }
        if let Some(secs) = get("MOCK_CHAT_RECONNECT_SECS").and_then(|s| s.parse().ok()) {
            self.reconnect_backoff = Duration::from_secs(secs);
        }
        if let Some(secs) = get("MOCK_CHAT_POLL_SECS").and_then(|s| s.parse().ok()) {
            self.poll_interval = Duration::from_secs(secs);
        }
    }
}
