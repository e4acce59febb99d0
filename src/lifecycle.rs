//! Reactions to wearable host connect/disconnect events.
//!
//! Reconnect detection hinges on ordering: the pending-removal check must
//! happen before `get_or_create`, otherwise a reconnect inside the grace
//! period is indistinguishable from a fresh session.

use crate::bus::Topic;
use crate::events;
use crate::hardware::SharedSession;
use crate::registry::SessionRegistry;
use std::sync::Arc;
use tracing::{debug, info};

/// Lifecycle controller for hardware sessions.
pub struct LifecycleController {
    registry: Arc<SessionRegistry>,
    welcome_sound_url: Option<String>,
}

impl LifecycleController {
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        let welcome_sound_url = registry.config().server.welcome_sound_url.clone();
        Self {
            registry,
            welcome_sound_url,
        }
    }

    /// A pair of glasses connected (or reconnected) for a user.
    pub async fn on_session(&self, session: SharedSession, user_id: &str) {
        let was_reconnect = self.registry.cancel_removal(user_id);
        let user = self.registry.get_or_create(user_id);

        if !was_reconnect {
            user.initialize().await;
        }
        user.set_app_session(Arc::clone(&session));

        let glasses_type = session.capabilities().glasses_type();
        if was_reconnect {
            info!(user_id, glasses_type, "session reconnected");
            self.registry.bus().broadcast(
                user_id,
                Topic::Chat,
                &events::session_reconnected(glasses_type),
            );
        } else {
            info!(user_id, glasses_type, "session started");
            self.registry.bus().broadcast(
                user_id,
                Topic::Chat,
                &events::session_started(glasses_type),
            );
            if let Some(url) = self.welcome_sound_url.clone() {
                tokio::spawn(async move {
                    if let Err(e) = session.play_audio(&url).await {
                        debug!("welcome sound failed: {e}");
                    }
                });
            }
        }
    }

    /// The glasses disconnected; keep state for a possible reconnect.
    ///
    /// Emits `session_reconnecting` (never `session_ended` — that belongs
    /// to grace expiry) and leaves pending event queues untouched.
    pub fn on_stop(&self, user_id: &str, reason: &str) {
        info!(user_id, reason, "session stopping");
        self.registry.bus().broadcast(
            user_id,
            Topic::Chat,
            &events::session_reconnecting(reason),
        );
        self.registry.soft_remove(user_id);
    }

    /// Shared registry handle.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
}
