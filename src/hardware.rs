//! Hardware session interface to the wearable SDK.
//!
//! The glasses host hands the core a capability object per connection. The
//! core never owns the device; it registers for events and issues bounded
//! imperative calls. Only the lifecycle controller mutates which session a
//! user holds — everything else reads the current handle through a
//! [`SessionSlot`].

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;

/// Static capabilities reported by the connected glasses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub has_camera: bool,
    pub has_display: bool,
    pub has_speaker: bool,
    /// Device model name as reported by the host (e.g. "G2 Display").
    pub model_name: String,
}

impl Capabilities {
    /// Coarse device class used in session lifecycle events.
    #[must_use]
    pub fn glasses_type(&self) -> &'static str {
        if self.has_display { "display" } else { "camera" }
    }
}

/// One transcription event from the speech-to-text stream.
///
/// Within one `utterance_id` the text is cumulative; across utterance ids the
/// text restarts. `utterance_id` may be absent — the `is_final` edge is then
/// the utterance boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptionEvent {
    pub text: String,
    pub is_final: bool,
    pub utterance_id: Option<String>,
    pub speaker_id: Option<String>,
}

/// A coordinate fix from the glasses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
    pub accuracy: Option<f64>,
}

/// A photo captured by the glasses camera.
#[derive(Debug, Clone)]
pub struct CapturedPhoto {
    pub request_id: String,
    pub bytes: Bytes,
    pub mime_type: String,
    pub filename: String,
}

/// Push events delivered by the hardware session.
#[derive(Debug, Clone)]
pub enum HardwareEvent {
    Transcription(TranscriptionEvent),
    Location(Coordinates),
    /// Opaque notification payload, shaped as whatever the host sends.
    Notification(serde_json::Value),
    /// A device-side settings change (e.g. `timezone`).
    SettingChanged { key: String, value: String },
}

/// Capability object for one connected pair of glasses.
///
/// Imperative calls are bounded on the host side; callers still apply their
/// own deadlines. Event delivery uses a broadcast channel so re-wiring a
/// session never duplicates the underlying host subscription.
#[async_trait]
pub trait HardwareSession: Send + Sync {
    /// Static device capabilities.
    fn capabilities(&self) -> Capabilities;

    /// Subscribe to the push event stream.
    fn events(&self) -> broadcast::Receiver<HardwareEvent>;

    /// Capture one photo.
    async fn capture_photo(&self) -> Result<CapturedPhoto>;

    /// Fetch a fresh coordinate fix.
    async fn latest_location(&self) -> Result<Coordinates>;

    /// Speak text through the glasses speaker.
    async fn speak(&self, text: &str) -> Result<()>;

    /// Show a text wall on the glasses display for `duration`.
    async fn show_text_wall(&self, text: &str, duration: Duration) -> Result<()>;

    /// Play a sound from a URL.
    async fn play_audio(&self, url: &str) -> Result<()>;

    /// Stop any playing audio.
    async fn stop_audio(&self) -> Result<()>;
}

/// Shared handle to a hardware session.
pub type SharedSession = Arc<dyn HardwareSession>;

/// The one mutable slot holding a user's current hardware session.
///
/// Managers are handed a clone at construction and treat it read-only; the
/// user aggregate is the only writer.
#[derive(Clone, Default)]
pub struct SessionSlot {
    inner: Arc<RwLock<Option<SharedSession>>>,
}

impl SessionSlot {
    /// Create an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current session, if attached.
    #[must_use]
    pub fn get(&self) -> Option<SharedSession> {
        self.inner.read().ok().and_then(|guard| guard.clone())
    }

    /// Whether a session is currently attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.inner.read().map(|g| g.is_some()).unwrap_or(false)
    }

    pub(crate) fn set(&self, session: SharedSession) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = Some(session);
        }
    }

    pub(crate) fn clear(&self) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = None;
        }
    }
}

impl std::fmt::Debug for SessionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSlot")
            .field("attached", &self.is_attached())
            .finish()
    }
}
