//! External agent adapter.
//!
//! The only component allowed to talk to the language-model service. The
//! pipeline hands it a query, optional photo bytes, and a device/context
//! snapshot; it returns plain response text. Calls are expected to be slow
//! (seconds) and to fail — the pipeline applies the deadline and substitutes
//! the apology.

mod http_provider;

pub use http_provider::HttpAgent;

use crate::error::Result;
use crate::history::ChatTurn;
use async_trait::async_trait;
use bytes::Bytes;

/// Fixed response used whenever the agent fails or times out.
pub const APOLOGY: &str =
    "Sorry, I had trouble answering that. Please try again in a moment.";

/// Fixed response used when a query arrives with no connected glasses.
pub const NO_SESSION_APOLOGY: &str =
    "Sorry, I can't reach your glasses right now.";

/// Device and situational context attached to one agent call.
#[derive(Debug, Clone, Default)]
pub struct AgentContext {
    pub has_display: bool,
    pub has_speakers: bool,
    pub has_camera: bool,
    /// Human-readable location (address or raw coordinates).
    pub location: Option<String>,
    /// Local time rendered in the device timezone.
    pub local_time: Option<String>,
    /// IANA timezone name, when the device reported one.
    pub timezone: Option<String>,
    /// Pre-formatted recent notifications.
    pub notifications: Option<String>,
    /// Recent turns, youngest last.
    pub conversation_history: Vec<ChatTurn>,
}

/// One request to the agent.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub query: String,
    /// Newest photo first, then recency context. Empty for text-only queries.
    pub photos: Vec<Bytes>,
    pub context: AgentContext,
}

/// Generative agent contract.
#[async_trait]
pub trait AgentProvider: Send + Sync {
    /// Produce a response for the query. Implementations do not apply their
    /// own deadline; the pipeline wraps the call.
    async fn generate(&self, request: AgentRequest) -> Result<String>;
}

/// Render the context into the system prompt the providers share.
#[must_use]
pub fn build_system_prompt(context: &AgentContext) -> String {
    let mut prompt = String::from(
        "You are a voice assistant on a pair of smart glasses. \
         Keep answers short and direct; they are spoken aloud or shown on a \
         small display.",
    );

    let mut outputs = Vec::new();
    if context.has_display {
        outputs.push("a display");
    }
    if context.has_speakers {
        outputs.push("speakers");
    }
    if !outputs.is_empty() {
        prompt.push_str(&format!("\nThe glasses have {}.", outputs.join(" and ")));
    }
    if context.has_camera {
        prompt.push_str("\nAttached images come from the wearer's camera, newest first.");
    }
    if let Some(location) = &context.location {
        prompt.push_str(&format!("\nThe wearer is at: {location}."));
    }
    if let Some(local_time) = &context.local_time {
        prompt.push_str(&format!("\nLocal time: {local_time}."));
    }
    if let Some(timezone) = &context.timezone {
        prompt.push_str(&format!("\nTimezone: {timezone}."));
    }
    if let Some(notifications) = &context.notifications {
        prompt.push_str(&format!("\nRecent phone notifications:\n{notifications}"));
    }

    prompt
}
