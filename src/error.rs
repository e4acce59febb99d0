//! Error types for the glint orchestration core.

/// Top-level error type for the session and query orchestration core.
#[derive(Debug, thiserror::Error)]
pub enum GlintError {
    /// Hardware session call failure (photo, speak, display, audio, location).
    #[error("hardware error: {0}")]
    Hardware(String),

    /// The hardware session is not attached.
    #[error("no hardware session for user {0}")]
    NoSession(String),

    /// Agent (language model service) error.
    #[error("agent error: {0}")]
    Agent(String),

    /// Reverse geocoding error.
    #[error("geocoding error: {0}")]
    Geocoding(String),

    /// Chat-turn archive (SQLite) error.
    #[error("archive error: {0}")]
    Archive(String),

    /// Event bus error.
    #[error("bus error: {0}")]
    Bus(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// HTTP server error (bind, serve).
    #[error("server error: {0}")]
    Server(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, GlintError>;
