//! Per-user aggregate.
//!
//! Owns every per-user component and the wiring between them. The hardware
//! session is held in a [`SessionSlot`] the managers read through; only this
//! aggregate (driven by the lifecycle controller) writes it. A single
//! forwarding task moves hardware events to their consumers, and a single
//! worker task runs queued queries one at a time — the per-user
//! serialisation everything else relies on.

use crate::agent::AgentProvider;
use crate::bus::{EventBus, Topic};
use crate::config::GlintConfig;
use crate::events;
use crate::hardware::{Capabilities, HardwareEvent, SessionSlot, SharedSession};
use crate::history::{ChatHistory, TurnArchive};
use crate::location::{Geocoder, LocationManager};
use crate::notifications::NotificationStore;
use crate::photos::PhotoStore;
use crate::pipeline::QueryPipeline;
use crate::settings::SettingsStore;
use crate::transcription::TranscriptAccumulator;
use crate::wake::WakeMatcher;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Everything one user owns while their session (or a grace period) lives.
pub struct User {
    user_id: String,
    slot: SessionSlot,
    bus: Arc<EventBus>,
    settings: Arc<SettingsStore>,
    accumulator: Arc<TranscriptAccumulator>,
    photos: Arc<PhotoStore>,
    location: Arc<LocationManager>,
    notifications: Arc<NotificationStore>,
    history: Arc<ChatHistory>,
    pipeline: Arc<QueryPipeline>,
    forward_task: Mutex<Option<JoinHandle<()>>>,
    worker_task: Mutex<Option<JoinHandle<()>>>,
    initialized: AtomicBool,
}

impl User {
    /// Build the aggregate and start its query worker.
    #[must_use]
    pub fn new(
        user_id: &str,
        config: &GlintConfig,
        bus: Arc<EventBus>,
        matcher: Arc<WakeMatcher>,
        agent: Arc<dyn AgentProvider>,
        geocoder: Option<Arc<dyn Geocoder>>,
        archive: Option<Arc<TurnArchive>>,
        settings: Arc<SettingsStore>,
    ) -> Arc<Self> {
        let slot = SessionSlot::new();
        let (query_tx, mut query_rx) = mpsc::unbounded_channel();

        let accumulator = TranscriptAccumulator::new(
            user_id,
            Arc::clone(&matcher),
            config.accumulator.silence_ms,
            query_tx,
        );
        let photos = Arc::new(PhotoStore::new(
            user_id,
            slot.clone(),
            Arc::clone(&bus),
            &config.photos,
        ));
        let location = Arc::new(LocationManager::new(
            user_id,
            slot.clone(),
            geocoder,
            Arc::clone(&matcher),
            &config.location,
        ));
        let notifications = Arc::new(NotificationStore::new(&config.notifications));
        let history = Arc::new(ChatHistory::new(user_id, archive, &config.history));

        let pipeline = Arc::new(QueryPipeline::new(
            user_id,
            &config.agent.agent_id,
            slot.clone(),
            Arc::clone(&bus),
            Arc::clone(&photos),
            Arc::clone(&location),
            Arc::clone(&notifications),
            Arc::clone(&history),
            agent,
            Duration::from_secs(config.agent.deadline_secs),
            Duration::from_secs(config.server.display_secs),
            config.server.processing_sound_url.clone(),
        ));

        // Queries run strictly one at a time, in arrival order.
        let worker_pipeline = Arc::clone(&pipeline);
        let worker = tokio::spawn(async move {
            while let Some(ready) = query_rx.recv().await {
                let _ = worker_pipeline
                    .run(&ready.query, ready.speaker_id.as_deref())
                    .await;
            }
        });

        Arc::new(Self {
            user_id: user_id.to_owned(),
            slot,
            bus,
            settings,
            accumulator,
            photos,
            location,
            notifications,
            history,
            pipeline,
            forward_task: Mutex::new(None),
            worker_task: Mutex::new(Some(worker)),
            initialized: AtomicBool::new(false),
        })
    }

    /// One-time setup on first connect: apply stored settings.
    ///
    /// Reconnects within the grace period skip this — their state is live.
    pub async fn initialize(&self) {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return;
        }
        let settings = self.settings.get(&self.user_id);
        self.history
            .set_archive_enabled(settings.chat_history_enabled);
        info!(user_id = %self.user_id, "user initialised");
    }

    /// Attach (or replace) the hardware session and wire its events.
    ///
    /// An existing session is cleared first so an ungraceful reconnect never
    /// leaves two live subscriptions behind.
    pub fn set_app_session(self: &Arc<Self>, session: SharedSession) {
        self.clear_app_session();

        let mut events = session.events();
        self.slot.set(session);
        self.accumulator.set_destroyed(false);

        let this = Arc::clone(self);
        let forward = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => this.dispatch_hardware_event(event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(
                            user_id = %this.user_id,
                            skipped, "hardware event stream lagged"
                        );
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let mut guard = self
            .forward_task
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *guard = Some(forward);
    }

    /// Detach from the hardware session.
    pub fn clear_app_session(&self) {
        let mut guard = self
            .forward_task
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(task) = guard.take() {
            task.abort();
        }
        drop(guard);

        self.accumulator.detach();
        self.accumulator.set_destroyed(true);
        self.slot.clear();
    }

    fn dispatch_hardware_event(self: &Arc<Self>, event: HardwareEvent) {
        match event {
            HardwareEvent::Transcription(ev) => {
                self.bus.broadcast(
                    &self.user_id,
                    Topic::Transcription,
                    &events::transcription(&ev.text, ev.is_final),
                );
                self.accumulator.handle_event(&ev);
            }
            HardwareEvent::Location(coords) => self.location.note_coordinates(coords),
            HardwareEvent::Notification(payload) => self.notifications.push(payload),
            HardwareEvent::SettingChanged { key, value } => {
                if key == "timezone" {
                    self.location.set_timezone(&value);
                }
            }
        }
    }

    /// Full teardown: detach hardware and stop the query worker.
    pub fn teardown(&self) {
        self.clear_app_session();
        let mut guard = self
            .worker_task
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(task) = guard.take() {
            task.abort();
        }
        info!(user_id = %self.user_id, "user torn down");
    }

    /// Stable user identifier.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Whether a hardware session is attached.
    #[must_use]
    pub fn has_session(&self) -> bool {
        self.slot.is_attached()
    }

    /// Capabilities of the attached glasses, if any.
    #[must_use]
    pub fn capabilities(&self) -> Option<Capabilities> {
        self.slot.get().map(|session| session.capabilities())
    }

    /// Current hardware session handle, if attached.
    #[must_use]
    pub fn session(&self) -> Option<SharedSession> {
        self.slot.get()
    }

    #[must_use]
    pub fn photos(&self) -> &Arc<PhotoStore> {
        &self.photos
    }

    #[must_use]
    pub fn history(&self) -> &Arc<ChatHistory> {
        &self.history
    }

    #[must_use]
    pub fn location(&self) -> &Arc<LocationManager> {
        &self.location
    }

    #[must_use]
    pub fn notifications(&self) -> &Arc<NotificationStore> {
        &self.notifications
    }

    #[must_use]
    pub fn accumulator(&self) -> &Arc<TranscriptAccumulator> {
        &self.accumulator
    }

    #[must_use]
    pub fn pipeline(&self) -> &Arc<QueryPipeline> {
        &self.pipeline
    }
}

impl Drop for User {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.worker_task.lock()
            && let Some(task) = guard.take()
        {
            task.abort();
        }
        if let Ok(mut guard) = self.forward_task.lock()
            && let Some(task) = guard.take()
        {
            task.abort();
        }
    }
}
