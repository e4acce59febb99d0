//! Bounded per-user photo retention.
//!
//! Captured photos feed two consumers: the agent (which wants the newest
//! bytes plus a little recency context) and the web UI (which fetches a
//! photo by request id after seeing its metadata on the photo stream).
//! Both get a bounded view — a recents list of K photos and a small
//! request-id lookup map — so a long session never accumulates images.

use crate::bus::{EventBus, Topic};
use crate::config::PhotoConfig;
use crate::error::{GlintError, Result};
use crate::events;
use crate::hardware::SessionSlot;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// One captured photo with its bytes.
#[derive(Debug, Clone)]
pub struct StoredPhoto {
    pub request_id: String,
    pub bytes: Bytes,
    pub mime_type: String,
    pub filename: String,
    pub size: usize,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
}

#[derive(Default)]
struct PhotoInner {
    /// Newest first, trimmed to the recents cap.
    recents: VecDeque<Arc<StoredPhoto>>,
    /// Insertion order, oldest evicted at the lookup cap.
    lookup: VecDeque<Arc<StoredPhoto>>,
}

/// Per-user photo store.
pub struct PhotoStore {
    user_id: String,
    slot: SessionSlot,
    bus: Arc<EventBus>,
    recents_cap: usize,
    lookup_cap: usize,
    inner: Mutex<PhotoInner>,
}

impl PhotoStore {
    #[must_use]
    pub fn new(
        user_id: &str,
        slot: SessionSlot,
        bus: Arc<EventBus>,
        config: &PhotoConfig,
    ) -> Self {
        Self {
            user_id: user_id.to_owned(),
            slot,
            bus,
            recents_cap: config.recents.max(1),
            lookup_cap: config.lookup_capacity.max(1),
            inner: Mutex::new(PhotoInner::default()),
        }
    }

    /// Capture one photo through the hardware session, store it, and
    /// publish its metadata on the photo topic.
    ///
    /// # Errors
    ///
    /// Returns an error when no session is attached or the capture fails.
    pub async fn capture(&self) -> Result<Arc<StoredPhoto>> {
        let Some(session) = self.slot.get() else {
            return Err(GlintError::NoSession(self.user_id.clone()));
        };

        let captured = session.capture_photo().await?;
        let photo = Arc::new(StoredPhoto {
            size: captured.bytes.len(),
            request_id: captured.request_id,
            bytes: captured.bytes,
            mime_type: captured.mime_type,
            filename: captured.filename,
            timestamp: Utc::now(),
            user_id: self.user_id.clone(),
        });

        self.store(Arc::clone(&photo));
        self.bus
            .broadcast(&self.user_id, Topic::Photo, &events::photo(&photo));
        debug!(
            user_id = %self.user_id,
            request_id = %photo.request_id,
            size = photo.size,
            "photo captured"
        );
        Ok(photo)
    }

    fn store(&self, photo: Arc<StoredPhoto>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        inner.recents.push_front(Arc::clone(&photo));
        inner.recents.truncate(self.recents_cap);

        if inner.lookup.len() >= self.lookup_cap {
            inner.lookup.pop_front();
        }
        inner.lookup.push_back(photo);
    }

    /// Newest photo bytes first, then up to K−1 previous photos in recency
    /// order — the agent's visual context.
    #[must_use]
    pub fn context_bytes(&self) -> Vec<Bytes> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.recents.iter().map(|p| p.bytes.clone()).collect()
    }

    /// Newest stored photo, if any.
    #[must_use]
    pub fn latest(&self) -> Option<Arc<StoredPhoto>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.recents.front().cloned()
    }

    /// Fetch a photo by request id while it is still in the lookup window.
    #[must_use]
    pub fn lookup(&self, request_id: &str) -> Option<Arc<StoredPhoto>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .lookup
            .iter()
            .find(|p| p.request_id == request_id)
            .cloned()
    }
}
