//! Per-user, per-topic event fan-out with queueing for late subscribers.
//!
//! Events are serialised exactly once; the bus only moves strings. While a
//! (user, topic) pair has no subscribers, events accumulate in a bounded
//! pending FIFO which is drained — in emission order — into the first
//! subscriber that shows up. Subscriber writes go through a bounded channel:
//! a subscriber that stops draining (slow client) or disappears fails its
//! next write and is silently removed.

use crate::config::BusConfig;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// The three fan-out channels of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Chat,
    Transcription,
    Photo,
}

impl Topic {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Transcription => "transcription",
            Self::Photo => "photo",
        }
    }
}

struct SubscriberEntry {
    id: Uuid,
    tx: mpsc::Sender<String>,
}

#[derive(Default)]
struct TopicState {
    subscribers: Vec<SubscriberEntry>,
    pending: VecDeque<String>,
}

/// Process-wide event bus.
pub struct EventBus {
    pending_capacity: usize,
    subscriber_buffer: usize,
    topics: Mutex<HashMap<(String, Topic), TopicState>>,
}

/// A live subscription returned by [`EventBus::subscribe`].
///
/// Dropping the subscription deregisters the subscriber.
pub struct Subscription {
    /// Whether a non-empty pending FIFO was drained into this subscriber.
    pub flushed_pending: bool,
    rx: mpsc::Receiver<String>,
    guard: SubscriptionGuard,
}

impl Subscription {
    /// Unique subscriber id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.guard.id
    }

    /// Receive the next serialised event line.
    pub async fn next(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Take an already-buffered event line without waiting.
    pub fn try_next(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

struct SubscriptionGuard {
    bus: Arc<EventBus>,
    user_id: String,
    topic: Topic,
    id: Uuid,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.user_id, self.topic, self.id);
    }
}

impl EventBus {
    /// Create a bus.
    ///
    /// The per-subscriber buffer is clamped above the pending ceiling so a
    /// full pending FIFO always fits into a fresh subscriber.
    #[must_use]
    pub fn new(config: &BusConfig) -> Self {
        let pending_capacity = config.pending_capacity.max(1);
        Self {
            pending_capacity,
            subscriber_buffer: config.subscriber_buffer.max(pending_capacity + 8),
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Serialise and fan out one event.
    ///
    /// With no subscribers the line is queued (oldest dropped at the
    /// ceiling). A subscriber whose write fails is removed; the failure is
    /// never surfaced to the sender.
    pub fn broadcast(&self, user_id: &str, topic: Topic, event: &Value) {
        self.broadcast_line(user_id, topic, event.to_string());
    }

    fn broadcast_line(&self, user_id: &str, topic: Topic, line: String) {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        let state = topics
            .entry((user_id.to_owned(), topic))
            .or_default();

        if state.subscribers.is_empty() {
            if state.pending.len() >= self.pending_capacity {
                state.pending.pop_front();
            }
            state.pending.push_back(line);
            return;
        }

        state.subscribers.retain(|sub| {
            if sub.tx.try_send(line.clone()).is_ok() {
                true
            } else {
                debug!(
                    user_id,
                    topic = topic.as_str(),
                    subscriber = %sub.id,
                    "dropping unresponsive subscriber"
                );
                false
            }
        });
    }

    /// Register a subscriber and atomically drain any pending events into it.
    ///
    /// No event broadcast after this call returns can precede, in the
    /// subscriber's stream, an event that was pending when it was made.
    #[must_use]
    pub fn subscribe(self: &Arc<Self>, user_id: &str, topic: Topic) -> Subscription {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.subscriber_buffer);

        let flushed_pending = {
            let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
            let state = topics
                .entry((user_id.to_owned(), topic))
                .or_default();

            let flushed = !state.pending.is_empty();
            for line in state.pending.drain(..) {
                // Buffer is sized above the pending ceiling; a failure here
                // means the receiver is already gone.
                let _ = tx.try_send(line);
            }
            state.subscribers.push(SubscriberEntry { id, tx });
            flushed
        };

        Subscription {
            flushed_pending,
            rx,
            guard: SubscriptionGuard {
                bus: Arc::clone(self),
                user_id: user_id.to_owned(),
                topic,
                id,
            },
        }
    }

    /// Remove a subscriber. Safe to call for an id that is already gone.
    pub fn unsubscribe(&self, user_id: &str, topic: Topic, id: Uuid) {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        let key = (user_id.to_owned(), topic);
        if let Some(state) = topics.get_mut(&key) {
            state.subscribers.retain(|sub| sub.id != id);
            if state.subscribers.is_empty() && state.pending.is_empty() {
                topics.remove(&key);
            }
        }
    }

    /// Drop all pending events for a user, across every topic.
    ///
    /// Called on hard session end so a permanent disconnect cannot hold
    /// queued events forever.
    pub fn clear_pending(&self, user_id: &str) {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        for topic in [Topic::Chat, Topic::Transcription, Topic::Photo] {
            let key = (user_id.to_owned(), topic);
            if let Some(state) = topics.get_mut(&key) {
                state.pending.clear();
                if state.subscribers.is_empty() {
                    topics.remove(&key);
                }
            }
        }
    }

    /// Number of live subscribers for a (user, topic).
    #[must_use]
    pub fn subscriber_count(&self, user_id: &str, topic: Topic) -> usize {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics
            .get(&(user_id.to_owned(), topic))
            .map_or(0, |s| s.subscribers.len())
    }

    /// Number of queued events for a (user, topic).
    #[must_use]
    pub fn pending_len(&self, user_id: &str, topic: Topic) -> usize {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics
            .get(&(user_id.to_owned(), topic))
            .map_or(0, |s| s.pending.len())
    }
}
