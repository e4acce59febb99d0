//! Configuration types for the orchestration core.

use crate::error::{GlintError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for the glint core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlintConfig {
    /// Wake-phrase matching settings.
    pub wake: WakeConfig,
    /// Transcript accumulation settings.
    pub accumulator: AccumulatorConfig,
    /// Photo retention settings.
    pub photos: PhotoConfig,
    /// Location cache settings.
    pub location: LocationConfig,
    /// Notification retention settings.
    pub notifications: NotificationConfig,
    /// Chat history settings.
    pub history: HistoryConfig,
    /// Event bus fan-out settings.
    pub bus: BusConfig,
    /// Session grace-period settings.
    pub session: SessionConfig,
    /// External agent settings.
    pub agent: AgentConfig,
    /// HTTP server settings.
    pub server: ServerConfig,
}

/// Wake-phrase configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WakeConfig {
    /// Phrases that arm the accumulator. Matching is case-insensitive and
    /// tolerates transcription artifacts (split or joined words).
    pub phrases: Vec<String>,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            phrases: vec!["hey glint".to_owned()],
        }
    }
}

/// Transcript accumulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulatorConfig {
    /// Silence window after the last transcription event before the
    /// accumulated query is emitted, in milliseconds.
    pub silence_ms: u64,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self { silence_ms: 1_500 }
    }
}

/// Photo retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotoConfig {
    /// Number of most-recent photos kept with bytes for agent context.
    pub recents: usize,
    /// Capacity of the request-id lookup map (oldest evicted).
    pub lookup_capacity: usize,
}

impl Default for PhotoConfig {
    fn default() -> Self {
        Self {
            recents: 3,
            lookup_capacity: 8,
        }
    }
}

/// Location cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// How long a fetched coordinate (and its geocoding) stays fresh, in seconds.
    pub cache_ttl_secs: u64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self { cache_ttl_secs: 300 }
    }
}

/// Notification retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Maximum notifications kept per user.
    pub capacity: usize,
    /// Notifications older than this are never exposed, in seconds.
    pub max_age_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            max_age_secs: 300,
        }
    }
}

/// Chat history configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// In-memory turn ring capacity per user.
    pub capacity: usize,
    /// SQLite archive path. `None` keeps history in memory only.
    pub archive_path: Option<PathBuf>,
    /// Deadline for one archive append, in milliseconds. An append that
    /// exceeds this is abandoned; the in-memory ring stays authoritative.
    pub archive_deadline_ms: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: 30,
            archive_path: None,
            archive_deadline_ms: 2_000,
        }
    }
}

/// Event bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Ceiling per (user, topic) pending queue; oldest dropped when full.
    pub pending_capacity: usize,
    /// Per-subscriber write buffer. A subscriber that falls this many
    /// events behind is treated as disconnected and removed.
    pub subscriber_buffer: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            pending_capacity: 200,
            subscriber_buffer: 256,
        }
    }
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Grace period after hardware disconnect before per-user state is torn
    /// down, in milliseconds.
    pub grace_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { grace_ms: 60_000 }
    }
}

/// External agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Base URL of the OpenAI-compatible chat completions API (including `/v1`).
    pub api_url: String,
    /// Model identifier sent in requests.
    pub api_model: String,
    /// Environment variable holding the bearer token.
    pub api_key_env: String,
    /// Hard deadline for one `generate` call, in seconds.
    pub deadline_secs: u64,
    /// Sender id used for agent-authored chat events.
    pub agent_id: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".to_owned(),
            api_model: "gpt-4o-mini".to_owned(),
            api_key_env: "GLINT_AGENT_API_KEY".to_owned(),
            deadline_secs: 30,
            agent_id: "glint".to_owned(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port (0 = auto-assign).
    pub port: u16,
    /// Period of the SSE heartbeat, in seconds.
    pub heartbeat_secs: u64,
    /// How long responses stay on the glasses display, in seconds.
    pub display_secs: u64,
    /// Sound played when a session starts. `None` skips the welcome sound.
    pub welcome_sound_url: Option<String>,
    /// Sound played while a query is being processed.
    pub processing_sound_url: Option<String>,
    /// Shared secret for the wearable-host handshake.
    pub cookie_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8770,
            heartbeat_secs: 15,
            display_secs: 10,
            welcome_sound_url: None,
            processing_sound_url: None,
            cookie_secret: None,
        }
    }
}

impl GlintConfig {
    /// Load configuration from a TOML file, then apply environment overrides.
    ///
    /// A missing file yields the defaults (still with env overrides applied).
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                GlintError::Config(format!("failed to read {}: {e}", path.display()))
            })?;
            toml::from_str(&raw).map_err(|e| {
                GlintError::Config(format!("invalid config {}: {e}", path.display()))
            })?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Overlay settings from the process environment.
    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("GLINT_DB_PATH")
            && !path.trim().is_empty()
        {
            self.history.archive_path = Some(PathBuf::from(path));
        }
        if let Ok(port) = std::env::var("GLINT_PORT")
            && let Ok(port) = port.trim().parse::<u16>()
        {
            self.server.port = port;
        }
        if let Ok(url) = std::env::var("GLINT_WELCOME_SOUND_URL")
            && !url.trim().is_empty()
        {
            self.server.welcome_sound_url = Some(url);
        }
        if let Ok(url) = std::env::var("GLINT_PROCESSING_SOUND_URL")
            && !url.trim().is_empty()
        {
            self.server.processing_sound_url = Some(url);
        }
        if let Ok(secret) = std::env::var("GLINT_COOKIE_SECRET")
            && !secret.trim().is_empty()
        {
            self.server.cookie_secret = Some(secret);
        }
    }

    /// Returns the default config file path (`~/.config/glint/glint.toml`).
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("glint")
            .join("glint.toml")
    }
}
