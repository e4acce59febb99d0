//! Disconnect, grace period, and reconnect behaviour.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use glint::bus::Topic;
use glint::config::GlintConfig;
use glint::hardware::Coordinates;
use glint::lifecycle::LifecycleController;
use glint::registry::SessionRegistry;
use glint::test_utils::{MockHardware, ScriptedAgent};
use std::sync::Arc;
use std::time::Duration;

fn make_core() -> Arc<LifecycleController> {
    let mut config = GlintConfig::default();
    config.wake.phrases = vec!["hey glint".to_owned()];
    let bus = Arc::new(glint::bus::EventBus::new(&config.bus));
    let registry = SessionRegistry::new(
        config,
        bus,
        ScriptedAgent::with_response("ok"),
        None,
        None,
        Arc::new(glint::settings::SettingsStore::new()),
    );
    Arc::new(LifecycleController::new(registry))
}

async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

fn event_type(line: &str) -> String {
    serde_json::from_str::<serde_json::Value>(line).unwrap()["type"]
        .as_str()
        .unwrap()
        .to_owned()
}

#[tokio::test(start_paused = true)]
async fn reconnect_within_grace_preserves_state_and_rewires() {
    let lifecycle = make_core();
    let registry = lifecycle.registry();
    let hw = MockHardware::display_glasses();

    lifecycle.on_session(hw.clone(), "u1").await;
    let user = registry.get("u1").unwrap();

    // One stored turn plus some per-user context before the disconnect.
    user.history().add_turn("q", "r", false, None).await;
    user.location().note_coordinates(Coordinates {
        lat: 1.0,
        lng: 2.0,
        accuracy: None,
    });
    user.notifications().push(serde_json::json!("ping"));

    let mut sub = registry.bus().subscribe("u1", Topic::Chat);
    assert_eq!(event_type(&sub.next().await.unwrap()), "session_started");

    lifecycle.on_stop("u1", "glasses_disconnected");
    settle().await;
    assert_eq!(event_type(&sub.next().await.unwrap()), "session_reconnecting");
    assert!(!registry.get("u1").unwrap().has_session());

    // Reconnect well inside the 60s grace window.
    tokio::time::advance(Duration::from_secs(30)).await;
    let hw2 = MockHardware::display_glasses();
    lifecycle.on_session(hw2.clone(), "u1").await;
    settle().await;
    assert_eq!(event_type(&sub.next().await.unwrap()), "session_reconnected");

    // Same aggregate, state intact.
    let again = registry.get("u1").unwrap();
    assert!(Arc::ptr_eq(&user, &again));
    assert_eq!(again.history().len(), 1);
    assert!(again.location().snapshot().is_some());
    assert_eq!(again.notifications().len(), 1);

    // The accumulator was un-destroyed: the next query flows end to end.
    hw2.emit_transcription("hey glint what time is it", true, Some("1"));
    settle().await;
    tokio::time::advance(Duration::from_millis(1_600)).await;
    settle().await;

    let mut saw_idle = false;
    while let Some(line) = sub.try_next() {
        if event_type(&line) == "idle" {
            saw_idle = true;
        }
    }
    assert!(saw_idle, "query after reconnect must complete");
    assert_eq!(again.history().len(), 2);

    // The grace timer was cancelled; nothing fires later.
    tokio::time::advance(Duration::from_secs(120)).await;
    settle().await;
    assert!(registry.get("u1").is_some());
}

#[tokio::test(start_paused = true)]
async fn disconnect_past_grace_tears_down_once() {
    let lifecycle = make_core();
    let registry = lifecycle.registry();
    let hw = MockHardware::display_glasses();

    lifecycle.on_session(hw.clone(), "u1").await;
    let mut sub = registry.bus().subscribe("u1", Topic::Chat);
    assert_eq!(event_type(&sub.next().await.unwrap()), "session_started");

    lifecycle.on_stop("u1", "glasses_disconnected");
    settle().await;
    assert_eq!(event_type(&sub.next().await.unwrap()), "session_reconnecting");

    tokio::time::advance(Duration::from_secs(61)).await;
    settle().await;

    assert_eq!(event_type(&sub.next().await.unwrap()), "session_ended");
    assert!(sub.try_next().is_none(), "exactly one session_ended");
    assert!(registry.get("u1").is_none());

    // A fresh subscriber finds no user, no pending, no history.
    drop(sub);
    let mut fresh = registry.bus().subscribe("u1", Topic::Chat);
    assert!(!fresh.flushed_pending);
    assert!(fresh.try_next().is_none());
}

#[tokio::test(start_paused = true)]
async fn pending_events_survive_soft_disconnect_for_a_reconnecting_subscriber() {
    let lifecycle = make_core();
    let registry = lifecycle.registry();
    let hw = MockHardware::display_glasses();

    lifecycle.on_session(hw.clone(), "u1").await;
    // No subscriber yet: everything queues.
    lifecycle.on_stop("u1", "glasses_disconnected");
    settle().await;

    // The queue still holds session_started + session_reconnecting.
    let mut sub = registry.bus().subscribe("u1", Topic::Chat);
    assert!(sub.flushed_pending);
    assert_eq!(event_type(&sub.next().await.unwrap()), "session_started");
    assert_eq!(event_type(&sub.next().await.unwrap()), "session_reconnecting");
}

#[tokio::test(start_paused = true)]
async fn replacing_a_session_never_double_delivers_transcriptions() {
    let lifecycle = make_core();
    let registry = lifecycle.registry();
    let hw = MockHardware::display_glasses();

    lifecycle.on_session(hw.clone(), "u1").await;
    let user = registry.get("u1").unwrap();
    // Ungraceful reconnect: a second attach of the same hardware session
    // without an intervening on_stop.
    user.set_app_session(hw.clone());
    settle().await;

    let mut sub = registry.bus().subscribe("u1", Topic::Transcription);
    while sub.try_next().is_some() {}

    hw.emit_transcription("hello there", false, None);
    settle().await;

    let first = sub.next().await;
    assert!(first.is_some());
    assert!(
        sub.try_next().is_none(),
        "one hardware event must reach the bus exactly once"
    );
}

#[tokio::test(start_paused = true)]
async fn hard_removal_stops_query_processing() {
    let lifecycle = make_core();
    let registry = lifecycle.registry();
    let hw = MockHardware::display_glasses();

    lifecycle.on_session(hw.clone(), "u1").await;
    registry.remove("u1");
    assert!(registry.get("u1").is_none());

    // Events from the orphaned hardware session go nowhere.
    hw.emit_transcription("hey glint hello", true, Some("1"));
    settle().await;
    tokio::time::advance(Duration::from_secs(3)).await;
    settle().await;
    assert!(registry.get("u1").is_none());
}
