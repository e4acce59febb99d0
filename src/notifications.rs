//! Time-bounded store of recent device notifications.
//!
//! Notifications are opaque blobs shaped as whatever the host sends. The
//! core never interprets them; it only keeps the freshest few around so the
//! agent can mention what just buzzed on the user's phone.

use crate::config::NotificationConfig;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// One received notification.
#[derive(Debug, Clone)]
pub struct Notification {
    pub payload: serde_json::Value,
    pub received_at_wall: DateTime<Utc>,
    received_at: Instant,
}

/// Per-user notification ring.
pub struct NotificationStore {
    capacity: usize,
    max_age: Duration,
    ring: Mutex<VecDeque<Notification>>,
}

impl NotificationStore {
    #[must_use]
    pub fn new(config: &NotificationConfig) -> Self {
        Self {
            capacity: config.capacity.max(1),
            max_age: Duration::from_secs(config.max_age_secs),
            ring: Mutex::new(VecDeque::new()),
        }
    }

    /// Record one notification, evicting the oldest at capacity.
    pub fn push(&self, payload: serde_json::Value) {
        let mut ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        if ring.len() >= self.capacity {
            ring.pop_front();
        }
        ring.push_back(Notification {
            payload,
            received_at_wall: Utc::now(),
            received_at: Instant::now(),
        });
    }

    /// The most recent `limit` notifications younger than the age threshold,
    /// oldest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<Notification> {
        let ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let fresh: Vec<Notification> = ring
            .iter()
            .filter(|n| now.duration_since(n.received_at) < self.max_age)
            .cloned()
            .collect();
        let skip = fresh.len().saturating_sub(limit);
        fresh.into_iter().skip(skip).collect()
    }

    /// Stringify recent notifications for agent prompt inclusion.
    ///
    /// Returns `None` when there is nothing fresh to mention.
    #[must_use]
    pub fn format_for_agent(&self, limit: usize) -> Option<String> {
        let recent = self.recent(limit);
        if recent.is_empty() {
            return None;
        }
        let lines: Vec<String> = recent
            .iter()
            .map(|n| {
                format!(
                    "[{}] {}",
                    n.received_at_wall.format("%H:%M"),
                    compact_payload(&n.payload)
                )
            })
            .collect();
        Some(lines.join("\n"))
    }

    /// Number of stored notifications regardless of age.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the ring is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Render a notification payload on one line.
fn compact_payload(payload: &serde_json::Value) -> String {
    match payload {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde_json::json;

    fn store() -> NotificationStore {
        NotificationStore::new(&NotificationConfig::default())
    }

    #[tokio::test]
    async fn capacity_evicts_oldest() {
        let store = NotificationStore::new(&NotificationConfig {
            capacity: 2,
            max_age_secs: 300,
        });
        store.push(json!("one"));
        store.push(json!("two"));
        store.push(json!("three"));
        assert_eq!(store.len(), 2);
        let recent = store.recent(10);
        assert_eq!(recent[0].payload, json!("two"));
        assert_eq!(recent[1].payload, json!("three"));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_notifications_are_hidden() {
        let store = store();
        store.push(json!({"app": "mail", "title": "hello"}));
        tokio::time::advance(Duration::from_secs(301)).await;
        store.push(json!("fresh"));

        let recent = store.recent(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].payload, json!("fresh"));
        // The stale one is hidden, not evicted.
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn recent_honours_limit_keeping_newest() {
        let store = store();
        for n in 0..5 {
            store.push(json!(n));
        }
        let recent = store.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].payload, json!(3));
        assert_eq!(recent[1].payload, json!(4));
    }

    #[tokio::test]
    async fn format_for_agent_is_none_when_empty() {
        assert!(store().format_for_agent(5).is_none());
    }

    #[tokio::test]
    async fn format_for_agent_renders_string_payloads_bare() {
        let store = store();
        store.push(json!("Train delayed 10 minutes"));
        let formatted = store.format_for_agent(5).unwrap();
        assert!(formatted.contains("Train delayed 10 minutes"));
        assert!(!formatted.contains('"'));
    }
}
