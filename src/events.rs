//! Wire shapes for the server-push event stream.
//!
//! Every event is a JSON object with a `type` and a millisecond `timestamp`.
//! Events are serialised once at broadcast time; the bus and the pending
//! queues only ever carry the resulting strings.

use crate::history::ChatTurn;
use crate::photos::StoredPhoto;
use chrono::Utc;
use serde_json::{Value, json};

/// Current time in epoch milliseconds, as carried on every event.
#[must_use]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// `{type: connected}` — first event on every stream.
#[must_use]
pub fn connected() -> Value {
    json!({ "type": "connected", "timestamp": now_ms() })
}

/// `{type: heartbeat}` — liveness tick on transcription/photo streams.
#[must_use]
pub fn heartbeat() -> Value {
    json!({ "type": "heartbeat", "timestamp": now_ms() })
}

/// `{type: session_heartbeat, active}` — chat-stream liveness tick.
#[must_use]
pub fn session_heartbeat(active: bool) -> Value {
    json!({ "type": "session_heartbeat", "active": active, "timestamp": now_ms() })
}

/// `{type: processing}` — a query pipeline has started.
#[must_use]
pub fn processing() -> Value {
    json!({ "type": "processing", "timestamp": now_ms() })
}

/// `{type: idle}` — the pipeline finished.
#[must_use]
pub fn idle() -> Value {
    json!({ "type": "idle", "timestamp": now_ms() })
}

/// `{type: message}` — one chat message (user or agent authored).
#[must_use]
pub fn message(
    sender_id: &str,
    recipient_id: &str,
    content: &str,
    image: Option<&str>,
) -> Value {
    let mut value = json!({
        "type": "message",
        "senderId": sender_id,
        "recipientId": recipient_id,
        "content": content,
        "timestamp": now_ms(),
    });
    if let Some(image) = image {
        value["image"] = json!(image);
    }
    value
}

/// `{type: history, messages}` — chat turns expanded into alternating
/// user/agent entries, oldest first.
#[must_use]
pub fn history(user_id: &str, agent_id: &str, turns: &[ChatTurn]) -> Value {
    let mut messages = Vec::with_capacity(turns.len() * 2);
    for (i, turn) in turns.iter().enumerate() {
        let ts = turn.timestamp.timestamp_millis();
        let mut user_entry = json!({
            "id": format!("turn-{i}-user"),
            "senderId": user_id,
            "recipientId": agent_id,
            "content": turn.query,
            "timestamp": ts,
        });
        if let Some(photo_ref) = &turn.photo_ref {
            user_entry["image"] = json!(photo_ref);
        }
        messages.push(user_entry);
        messages.push(json!({
            "id": format!("turn-{i}-agent"),
            "senderId": agent_id,
            "recipientId": user_id,
            "content": turn.response,
            "timestamp": ts,
        }));
    }
    json!({ "type": "history", "messages": messages, "timestamp": now_ms() })
}

/// `{type: session_started, glassesType}`.
#[must_use]
pub fn session_started(glasses_type: &str) -> Value {
    json!({ "type": "session_started", "glassesType": glasses_type, "timestamp": now_ms() })
}

/// `{type: session_reconnecting, reason}`.
#[must_use]
pub fn session_reconnecting(reason: &str) -> Value {
    json!({ "type": "session_reconnecting", "reason": reason, "timestamp": now_ms() })
}

/// `{type: session_reconnected, glassesType}`.
#[must_use]
pub fn session_reconnected(glasses_type: &str) -> Value {
    json!({ "type": "session_reconnected", "glassesType": glasses_type, "timestamp": now_ms() })
}

/// `{type: session_ended, reason}`.
#[must_use]
pub fn session_ended(reason: &str) -> Value {
    json!({ "type": "session_ended", "reason": reason, "timestamp": now_ms() })
}

/// Transcription-topic passthrough of one speech event.
#[must_use]
pub fn transcription(text: &str, is_final: bool) -> Value {
    json!({
        "type": "transcription",
        "text": text,
        "isFinal": is_final,
        "timestamp": now_ms(),
    })
}

/// Photo-topic metadata event. Never carries raw bytes; clients fetch the
/// binary through `/api/photo/{requestId}`.
#[must_use]
pub fn photo(photo: &StoredPhoto) -> Value {
    json!({
        "type": "photo",
        "requestId": photo.request_id,
        "timestamp": photo.timestamp.timestamp_millis(),
        "mimeType": photo.mime_type,
        "filename": photo.filename,
        "size": photo.size,
        "userId": photo.user_id,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn every_event_has_type_and_timestamp() {
        for event in [
            connected(),
            heartbeat(),
            session_heartbeat(true),
            processing(),
            idle(),
            message("u", "glint", "hi", None),
            session_started("display"),
            session_reconnecting("glasses_disconnected"),
            session_reconnected("camera"),
            session_ended("grace_period_expired"),
            transcription("hello", false),
        ] {
            assert!(event.get("type").is_some(), "missing type: {event}");
            assert!(event.get("timestamp").is_some(), "missing timestamp: {event}");
        }
    }

    #[test]
    fn message_image_is_optional() {
        let without = message("u", "glint", "hi", None);
        assert!(without.get("image").is_none());
        let with = message("u", "glint", "hi", Some("req-1"));
        assert_eq!(with["image"], "req-1");
    }

    #[test]
    fn history_expands_turns_in_order() {
        let turns = vec![
            ChatTurn {
                query: "what time is it".to_owned(),
                response: "quarter past three".to_owned(),
                timestamp: Utc::now(),
                had_photo: false,
                photo_ref: None,
            },
            ChatTurn {
                query: "read this".to_owned(),
                response: "it says exit".to_owned(),
                timestamp: Utc::now(),
                had_photo: true,
                photo_ref: Some("req-9".to_owned()),
            },
        ];
        let event = history("u1", "glint", &turns);
        let messages = event["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["senderId"], "u1");
        assert_eq!(messages[1]["senderId"], "glint");
        assert_eq!(messages[2]["image"], "req-9");
        assert_eq!(messages[3]["content"], "it says exit");
    }
}
