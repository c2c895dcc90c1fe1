use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::reconnect::ReconnectPolicy;
use crate::types::{ClientError, Result};

/// Client configuration, usually loaded from `nm-chat.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket endpoint of the LLM stream.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Which LLM runner the server should use for this session.
    #[serde(default = "default_runner_type")]
    pub runner_type: String,

    /// IANA time zone sent in the initialization frame.
    #[serde(default = "default_time_zone")]
    pub time_zone: String,

    /// Forward function-data frames (host lists) to the state sink.
    #[serde(default)]
    pub dashboard: bool,

    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

// ── Reconnect ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

// ── Session ids ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Reuse a session id for this long before minting a new one.
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: i64,

    /// Where to persist the session id between runs.  In-memory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
}

// ── Defaults ───────────────────────────────────────────────────────

fn default_server_url() -> String {
    "wss://devoauth.freenetworkmonitor.click/LLM/llm-stream".into()
}
fn default_runner_type() -> String {
    "TurboLLM".into()
}
fn default_time_zone() -> String {
    std::env::var("TZ")
        .ok()
        .filter(|tz| !tz.is_empty())
        .unwrap_or_else(|| "UTC".into())
}
fn default_heartbeat_secs() -> u64 {
    20
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_max_attempts() -> u32 {
    5
}
fn default_ttl_hours() -> i64 {
    24
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            runner_type: default_runner_type(),
            time_zone: default_time_zone(),
            dashboard: false,
            heartbeat_secs: default_heartbeat_secs(),
            reconnect: ReconnectConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_ttl_hours(),
            store_path: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing keys.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from file if it exists and is valid, otherwise return defaults.
    pub fn load_or_default(path: &str) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(ClientError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Self::default()
            }
            Err(e) => {
                tracing::warn!(path, error = %e, "invalid config, using defaults");
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_url.is_empty() {
            return Err(ClientError::Config("server_url is required".into()));
        }
        if !(self.server_url.starts_with("ws://") || self.server_url.starts_with("wss://")) {
            return Err(ClientError::Config(format!(
                "server_url must be a ws:// or wss:// URL, got {}",
                self.server_url
            )));
        }
        if self.heartbeat_secs == 0 {
            return Err(ClientError::Config("heartbeat_secs must be positive".into()));
        }
        if self.session.ttl_hours <= 0 {
            return Err(ClientError::Config("session.ttl_hours must be positive".into()));
        }
        Ok(())
    }

    /// The configured zone if it is a known IANA id, otherwise `UTC`.
    pub fn resolved_time_zone(&self) -> String {
        match self.time_zone.parse::<chrono_tz::Tz>() {
            Ok(tz) => tz.name().to_string(),
            Err(_) => {
                tracing::warn!(time_zone = %self.time_zone, "unknown time zone, using UTC");
                "UTC".into()
            }
        }
    }

    /// The configured runner, warning when the server is not known to offer it.
    pub fn resolved_runner_type(&self) -> String {
        if !nm_protocol::KNOWN_RUNNER_TYPES.contains(&self.runner_type.as_str()) {
            tracing::warn!(runner_type = %self.runner_type, "unrecognized runner type");
        }
        self.runner_type.clone()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect.base_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            max_attempts: self.reconnect.max_attempts,
        }
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session.ttl_hours)
    }
}
