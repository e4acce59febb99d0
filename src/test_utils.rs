//! Shared test doubles used across module and integration tests.
//!
//! `MockHardware` is a scriptable stand-in for the wearable SDK session;
//! `ScriptedAgent` replaces the language-model service with canned
//! responses, optional delay, and call recording.

use crate::agent::{AgentProvider, AgentRequest};
use crate::error::{GlintError, Result};
use crate::hardware::{
    Capabilities, CapturedPhoto, Coordinates, HardwareEvent, HardwareSession, TranscriptionEvent,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Scriptable hardware session.
pub struct MockHardware {
    capabilities: Capabilities,
    events_tx: broadcast::Sender<HardwareEvent>,
    photos: Mutex<VecDeque<Bytes>>,
    location: Mutex<Option<Coordinates>>,
    spoken: Mutex<Vec<String>>,
    displayed: Mutex<Vec<String>>,
    played: Mutex<Vec<String>>,
    capture_fails: AtomicBool,
}

impl MockHardware {
    #[must_use]
    pub fn new(capabilities: Capabilities) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            capabilities,
            events_tx,
            photos: Mutex::new(VecDeque::new()),
            location: Mutex::new(None),
            spoken: Mutex::new(Vec::new()),
            displayed: Mutex::new(Vec::new()),
            played: Mutex::new(Vec::new()),
            capture_fails: AtomicBool::new(false),
        })
    }

    /// Glasses with camera, display, and speakers.
    #[must_use]
    pub fn display_glasses() -> Arc<Self> {
        Self::new(Capabilities {
            has_camera: true,
            has_display: true,
            has_speaker: true,
            model_name: "Mock Display G2".to_owned(),
        })
    }

    /// Camera glasses: no display, audio out only.
    #[must_use]
    pub fn camera_only() -> Arc<Self> {
        Self::new(Capabilities {
            has_camera: true,
            has_display: false,
            has_speaker: true,
            model_name: "Mock Camera G1".to_owned(),
        })
    }

    /// Push one hardware event to subscribers.
    pub fn emit(&self, event: HardwareEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Convenience: push a transcription event.
    pub fn emit_transcription(&self, text: &str, is_final: bool, utterance_id: Option<&str>) {
        self.emit(HardwareEvent::Transcription(TranscriptionEvent {
            text: text.to_owned(),
            is_final,
            utterance_id: utterance_id.map(str::to_owned),
            speaker_id: Some("spk-1".to_owned()),
        }));
    }

    /// Queue bytes for the next `capture_photo` call.
    pub fn queue_photo(&self, bytes: impl Into<Bytes>) {
        self.photos
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(bytes.into());
    }

    /// Set the coordinates `latest_location` returns.
    pub fn set_location(&self, coords: Coordinates) {
        let mut guard = self.location.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(coords);
    }

    /// Make `capture_photo` fail until cleared.
    pub fn set_capture_fails(&self, fails: bool) {
        self.capture_fails.store(fails, Ordering::Relaxed);
    }

    /// Everything spoken so far.
    #[must_use]
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Everything shown on the display so far.
    #[must_use]
    pub fn displayed(&self) -> Vec<String> {
        self.displayed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Every audio URL played so far.
    #[must_use]
    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl HardwareSession for MockHardware {
    fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }

    fn events(&self) -> broadcast::Receiver<HardwareEvent> {
        self.events_tx.subscribe()
    }

    async fn capture_photo(&self) -> Result<CapturedPhoto> {
        if self.capture_fails.load(Ordering::Relaxed) {
            return Err(GlintError::Hardware("camera unavailable".to_owned()));
        }
        let bytes = self
            .photos
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Bytes::from_static(b"mock-jpeg"));
        let request_id = Uuid::new_v4().to_string();
        Ok(CapturedPhoto {
            filename: format!("{request_id}.jpg"),
            request_id,
            bytes,
            mime_type: "image/jpeg".to_owned(),
        })
    }

    async fn latest_location(&self) -> Result<Coordinates> {
        self.location
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .ok_or_else(|| GlintError::Hardware("no location fix".to_owned()))
    }

    async fn speak(&self, text: &str) -> Result<()> {
        self.spoken
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_owned());
        Ok(())
    }

    async fn show_text_wall(&self, text: &str, _duration: Duration) -> Result<()> {
        self.displayed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_owned());
        Ok(())
    }

    async fn play_audio(&self, url: &str) -> Result<()> {
        self.played
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.to_owned());
        Ok(())
    }

    async fn stop_audio(&self) -> Result<()> {
        Ok(())
    }
}

/// Agent double with a canned response.
pub struct ScriptedAgent {
    response: Mutex<String>,
    delay: Mutex<Option<Duration>>,
    fail: AtomicBool,
    requests: Mutex<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    #[must_use]
    pub fn with_response(response: &str) -> Arc<Self> {
        Arc::new(Self {
            response: Mutex::new(response.to_owned()),
            delay: Mutex::new(None),
            fail: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Change the canned response.
    pub fn set_response(&self, response: &str) {
        let mut guard = self.response.lock().unwrap_or_else(|e| e.into_inner());
        *guard = response.to_owned();
    }

    /// Delay each `generate` call (for deadline tests).
    pub fn set_delay(&self, delay: Option<Duration>) {
        let mut guard = self.delay.lock().unwrap_or_else(|e| e.into_inner());
        *guard = delay;
    }

    /// Make `generate` fail until cleared.
    pub fn set_fails(&self, fails: bool) {
        self.fail.store(fails, Ordering::Relaxed);
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl AgentProvider for ScriptedAgent {
    async fn generate(&self, request: AgentRequest) -> Result<String> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        let delay = *self.delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::Relaxed) {
            return Err(GlintError::Agent("scripted failure".to_owned()));
        }
        Ok(self.response.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}
