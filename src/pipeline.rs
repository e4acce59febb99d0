//! End-to-end orchestration of one user query.
//!
//! The pipeline owns the ordered side effects of answering: announce
//! processing, capture a photo, refresh location, call the agent, push the
//! answer to the glasses, and record the turn. Every step tolerates partial
//! failure — a dead camera or a slow geocoder degrades the answer, it never
//! aborts it.
//!
//! Event ordering is load-bearing: the user's `message` is broadcast before
//! the agent call begins and the agent's `message` before the history
//! write, so a late subscriber's pending-queue flush is itself a faithful
//! replay of the in-flight turn.

use crate::agent::{AgentContext, AgentProvider, AgentRequest, APOLOGY, NO_SESSION_APOLOGY};
use crate::bus::{EventBus, Topic};
use crate::events;
use crate::hardware::SessionSlot;
use crate::history::ChatHistory;
use crate::location::LocationManager;
use crate::notifications::NotificationStore;
use crate::photos::PhotoStore;
use crate::speech;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Notifications included in agent context.
const NOTIFICATION_LIMIT: usize = 5;
/// History turns replayed to the agent.
const HISTORY_LIMIT: usize = 10;

/// Per-user query pipeline.
pub struct QueryPipeline {
    user_id: String,
    agent_id: String,
    slot: SessionSlot,
    bus: Arc<EventBus>,
    photos: Arc<PhotoStore>,
    location: Arc<LocationManager>,
    notifications: Arc<NotificationStore>,
    history: Arc<ChatHistory>,
    agent: Arc<dyn AgentProvider>,
    agent_deadline: Duration,
    display_duration: Duration,
    processing_sound_url: Option<String>,
}

impl QueryPipeline {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        user_id: &str,
        agent_id: &str,
        slot: SessionSlot,
        bus: Arc<EventBus>,
        photos: Arc<PhotoStore>,
        location: Arc<LocationManager>,
        notifications: Arc<NotificationStore>,
        history: Arc<ChatHistory>,
        agent: Arc<dyn AgentProvider>,
        agent_deadline: Duration,
        display_duration: Duration,
        processing_sound_url: Option<String>,
    ) -> Self {
        Self {
            user_id: user_id.to_owned(),
            agent_id: agent_id.to_owned(),
            slot,
            bus,
            photos,
            location,
            notifications,
            history,
            agent,
            agent_deadline,
            display_duration,
            processing_sound_url,
        }
    }

    /// Run one query end to end. Returns the response text.
    ///
    /// Without a live hardware session this is a pure return of a short
    /// apology — no events, no side effects.
    pub async fn run(&self, query: &str, _speaker_id: Option<&str>) -> String {
        let Some(session) = self.slot.get() else {
            debug!(user_id = %self.user_id, "query refused: no hardware session");
            return NO_SESSION_APOLOGY.to_owned();
        };
        let caps = session.capabilities();

        self.bus
            .broadcast(&self.user_id, Topic::Chat, &events::processing());

        if let Some(url) = self.processing_sound_url.clone() {
            let audio_session = Arc::clone(&session);
            tokio::spawn(async move {
                if let Err(e) = audio_session.play_audio(&url).await {
                    debug!("processing sound failed: {e}");
                }
            });
        }

        let mut photo_ref = None;
        let mut photo_bytes = Vec::new();
        if caps.has_camera {
            match self.photos.capture().await {
                Ok(photo) => {
                    photo_ref = Some(photo.request_id.clone());
                    photo_bytes = self.photos.context_bytes();
                }
                Err(e) => {
                    debug!(user_id = %self.user_id, "photo capture failed: {e}");
                }
            }
        }

        let location = if self.location.query_needs_location(query) {
            self.location.refresh(query).await
        } else {
            None
        };

        let context = AgentContext {
            has_display: caps.has_display,
            has_speakers: caps.has_speaker,
            has_camera: caps.has_camera,
            location: location.map(|snapshot| snapshot.describe()),
            local_time: Some(self.location.local_time_string()),
            timezone: self.location.timezone().map(|tz| tz.name().to_owned()),
            notifications: self.notifications.format_for_agent(NOTIFICATION_LIMIT),
            conversation_history: self.history.recent_turns(HISTORY_LIMIT, None),
        };

        self.bus.broadcast(
            &self.user_id,
            Topic::Chat,
            &events::message(&self.user_id, &self.agent_id, query, photo_ref.as_deref()),
        );

        let request = AgentRequest {
            query: query.to_owned(),
            photos: photo_bytes,
            context,
        };
        let response = match tokio::time::timeout(self.agent_deadline, self.agent.generate(request))
            .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(user_id = %self.user_id, "agent call failed: {e}");
                APOLOGY.to_owned()
            }
            Err(_) => {
                warn!(
                    user_id = %self.user_id,
                    deadline_secs = self.agent_deadline.as_secs(),
                    "agent call timed out"
                );
                APOLOGY.to_owned()
            }
        };

        // Speaker-only devices get the response flattened for TTS.
        let spoken = if caps.has_speaker && !caps.has_display {
            speech::format_for_speech(&response)
        } else {
            response.clone()
        };

        if caps.has_display
            && let Err(e) = session.show_text_wall(&response, self.display_duration).await
        {
            debug!(user_id = %self.user_id, "display output failed: {e}");
        }
        if caps.has_speaker
            && let Err(e) = session.speak(&spoken).await
        {
            debug!(user_id = %self.user_id, "speak output failed: {e}");
        }

        self.bus.broadcast(
            &self.user_id,
            Topic::Chat,
            &events::message(&self.agent_id, &self.user_id, &response, None),
        );

        self.history
            .add_turn(query, &response, photo_ref.is_some(), photo_ref)
            .await;

        self.bus
            .broadcast(&self.user_id, Topic::Chat, &events::idle());

        response
    }
}
