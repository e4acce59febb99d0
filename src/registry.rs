//! Process-wide session registry.
//!
//! Maps user ids to live [`User`] aggregates and owns the grace-period
//! timers. Soft removal detaches the hardware and schedules a hard cleanup;
//! a reconnect inside the window cancels it and finds every in-memory store
//! exactly as it was left.

use crate::agent::AgentProvider;
use crate::bus::{EventBus, Topic};
use crate::config::GlintConfig;
use crate::events;
use crate::history::TurnArchive;
use crate::location::Geocoder;
use crate::settings::SettingsStore;
use crate::user::User;
use crate::wake::WakeMatcher;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

struct PendingRemoval {
    token: u64,
    handle: JoinHandle<()>,
}

/// Registry of per-user state.
pub struct SessionRegistry {
    config: GlintConfig,
    bus: Arc<EventBus>,
    matcher: Arc<WakeMatcher>,
    agent: Arc<dyn AgentProvider>,
    geocoder: Option<Arc<dyn Geocoder>>,
    archive: Option<Arc<TurnArchive>>,
    settings: Arc<SettingsStore>,
    users: Mutex<HashMap<String, Arc<User>>>,
    removals: Mutex<HashMap<String, PendingRemoval>>,
    removal_token: AtomicU64,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(
        config: GlintConfig,
        bus: Arc<EventBus>,
        agent: Arc<dyn AgentProvider>,
        geocoder: Option<Arc<dyn Geocoder>>,
        archive: Option<Arc<TurnArchive>>,
        settings: Arc<SettingsStore>,
    ) -> Arc<Self> {
        let matcher = Arc::new(WakeMatcher::new(&config.wake.phrases));
        Arc::new(Self {
            config,
            bus,
            matcher,
            agent,
            geocoder,
            archive,
            settings,
            users: Mutex::new(HashMap::new()),
            removals: Mutex::new(HashMap::new()),
            removal_token: AtomicU64::new(0),
        })
    }

    /// Fetch or create the aggregate for a user. Idempotent.
    #[must_use]
    pub fn get_or_create(&self, user_id: &str) -> Arc<User> {
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(user) = users.get(user_id) {
            return Arc::clone(user);
        }
        info!(user_id, "creating user");
        let user = User::new(
            user_id,
            &self.config,
            Arc::clone(&self.bus),
            Arc::clone(&self.matcher),
            Arc::clone(&self.agent),
            self.geocoder.clone(),
            self.archive.clone(),
            Arc::clone(&self.settings),
        );
        users.insert(user_id.to_owned(), Arc::clone(&user));
        user
    }

    /// Look up a user without creating one.
    #[must_use]
    pub fn get(&self, user_id: &str) -> Option<Arc<User>> {
        self.users
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
            .cloned()
    }

    /// Hard removal: cancel any pending timer, tear the user down, delete
    /// the entry. A no-op for unknown users.
    pub fn remove(&self, user_id: &str) {
        let _ = self.cancel_removal(user_id);
        let user = self
            .users
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(user_id);
        if let Some(user) = user {
            user.teardown();
            info!(user_id, "user removed");
        }
    }

    /// Soft removal: detach the hardware session and schedule a hard
    /// cleanup after the grace period.
    ///
    /// Unknown users are a no-op; repeated calls coalesce onto the newest
    /// timer. On expiry the user's subscribers see one `session_ended`, the
    /// pending queues are cleared, and the entry is removed.
    pub fn soft_remove(self: &Arc<Self>, user_id: &str) {
        let Some(user) = self.get(user_id) else {
            debug!(user_id, "soft remove for unknown user ignored");
            return;
        };
        user.clear_app_session();

        let _ = self.cancel_removal(user_id);

        let token = self.removal_token.fetch_add(1, Ordering::Relaxed);
        let grace = Duration::from_millis(self.config.session.grace_ms);
        let registry = Arc::clone(self);
        let owner = user_id.to_owned();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            registry.expire(&owner, token);
        });

        let mut removals = self.removals.lock().unwrap_or_else(|e| e.into_inner());
        removals.insert(user_id.to_owned(), PendingRemoval { token, handle });
        debug!(user_id, grace_ms = grace.as_millis() as u64, "removal scheduled");
    }

    /// Cancel a pending removal. Returns whether one was pending — the
    /// lifecycle controller's reconnect signal.
    pub fn cancel_removal(&self, user_id: &str) -> bool {
        let removed = self
            .removals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(user_id);
        match removed {
            Some(pending) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Grace period expired for a scheduled removal.
    fn expire(&self, user_id: &str, token: u64) {
        {
            let mut removals = self.removals.lock().unwrap_or_else(|e| e.into_inner());
            match removals.get(user_id) {
                Some(pending) if pending.token == token => {
                    removals.remove(user_id);
                }
                // Superseded or cancelled between fire and lock.
                _ => return,
            }
        }

        info!(user_id, "grace period expired");
        self.bus.broadcast(
            user_id,
            Topic::Chat,
            &events::session_ended("grace_period_expired"),
        );
        self.bus.clear_pending(user_id);
        self.remove(user_id);
    }

    /// Search every user's photo window for a request id.
    #[must_use]
    pub fn find_photo(&self, request_id: &str) -> Option<Arc<crate::photos::StoredPhoto>> {
        let users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        users
            .values()
            .find_map(|user| user.photos().lookup(request_id))
    }

    /// Number of live users.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.users.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether a removal timer is pending for a user.
    #[must_use]
    pub fn removal_pending(&self, user_id: &str) -> bool {
        self.removals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(user_id)
    }

    /// Shared event bus.
    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Settings store.
    #[must_use]
    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &GlintConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::test_utils::ScriptedAgent;

    fn registry_with_grace(grace_ms: u64) -> Arc<SessionRegistry> {
        let config = GlintConfig {
            session: crate::config::SessionConfig { grace_ms },
            ..Default::default()
        };
        let bus = Arc::new(EventBus::new(&config.bus));
        SessionRegistry::new(
            config,
            bus,
            ScriptedAgent::with_response("ok"),
            None,
            None,
            Arc::new(SettingsStore::new()),
        )
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let registry = registry_with_grace(60_000);
        let a = registry.get_or_create("u1");
        let b = registry.get_or_create("u1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.user_count(), 1);
    }

    #[tokio::test]
    async fn get_does_not_create() {
        let registry = registry_with_grace(60_000);
        assert!(registry.get("u1").is_none());
        assert_eq!(registry.user_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn soft_remove_then_cancel_restores_pre_state() {
        let registry = registry_with_grace(60_000);
        let user = registry.get_or_create("u1");
        user.history().add_turn("q", "r", false, None).await;

        registry.soft_remove("u1");
        assert!(registry.removal_pending("u1"));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(registry.cancel_removal("u1"));
        assert!(!registry.removal_pending("u1"));

        let user = registry.get("u1").unwrap();
        assert_eq!(user.history().len(), 1);

        // The grace window passing after cancellation must not remove.
        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(registry.get("u1").is_some());
    }

    #[tokio::test]
    async fn cancel_removal_without_pending_is_false() {
        let registry = registry_with_grace(60_000);
        let _ = registry.get_or_create("u1");
        assert!(!registry.cancel_removal("u1"));
    }

    #[tokio::test(start_paused = true)]
    async fn grace_expiry_emits_session_ended_and_clears() {
        let registry = registry_with_grace(60_000);
        let _ = registry.get_or_create("u1");
        let mut sub = registry.bus().subscribe("u1", Topic::Chat);

        // Something queued on another topic must be cleared on expiry.
        registry
            .bus()
            .broadcast("u1", Topic::Photo, &serde_json::json!({"n": 1}));

        registry.soft_remove("u1");
        tokio::time::advance(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        let line = sub.next().await.unwrap();
        assert!(line.contains("session_ended"), "got: {line}");
        assert!(registry.get("u1").is_none());
        assert!(!registry.removal_pending("u1"));
        assert_eq!(registry.bus().pending_len("u1", Topic::Photo), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_soft_removes_coalesce() {
        let registry = registry_with_grace(60_000);
        let _ = registry.get_or_create("u1");
        let mut sub = registry.bus().subscribe("u1", Topic::Chat);

        registry.soft_remove("u1");
        tokio::time::advance(Duration::from_secs(40)).await;
        registry.soft_remove("u1");

        // Old timer's deadline passes; only the new one counts.
        tokio::time::advance(Duration::from_secs(30)).await;
        tokio::task::yield_now().await;
        assert!(registry.get("u1").is_some());

        tokio::time::advance(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;
        assert!(registry.get("u1").is_none());

        let line = sub.next().await.unwrap();
        assert!(line.contains("session_ended"));
        assert!(sub.try_next().is_none(), "exactly one session_ended");
    }

    #[tokio::test]
    async fn soft_remove_unknown_user_is_a_no_op() {
        let registry = registry_with_grace(60_000);
        registry.soft_remove("ghost");
        assert!(!registry.removal_pending("ghost"));
    }
}
