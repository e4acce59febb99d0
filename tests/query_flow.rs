//! End-to-end query scenarios: speech stream in, chat events and hardware
//! output out, with a scripted agent.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use glint::bus::Topic;
use glint::config::GlintConfig;
use glint::lifecycle::LifecycleController;
use glint::registry::SessionRegistry;
use glint::test_utils::{MockHardware, ScriptedAgent};
use std::sync::Arc;
use std::time::Duration;

fn make_core(agent: Arc<ScriptedAgent>) -> Arc<LifecycleController> {
    let mut config = GlintConfig::default();
    config.wake.phrases = vec!["hey glint".to_owned()];
    let bus = Arc::new(glint::bus::EventBus::new(&config.bus));
    let registry = SessionRegistry::new(
        config,
        bus,
        agent,
        None,
        None,
        Arc::new(glint::settings::SettingsStore::new()),
    );
    Arc::new(LifecycleController::new(registry))
}

/// Let spawned tasks make progress under a paused clock.
async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

fn parse(line: &str) -> serde_json::Value {
    serde_json::from_str(line).unwrap()
}

#[tokio::test(start_paused = true)]
async fn spoken_query_produces_a_full_turn() {
    let agent = ScriptedAgent::with_response("It is quarter past three.");
    let lifecycle = make_core(Arc::clone(&agent));
    let hw = MockHardware::display_glasses();

    lifecycle.on_session(hw.clone(), "u1").await;
    let registry = lifecycle.registry();
    let mut sub = registry.bus().subscribe("u1", Topic::Chat);
    // Drop the connect-time event; this test is about the turn.
    let started = sub.next().await.unwrap();
    assert!(started.contains("session_started"));

    hw.emit_transcription("hey glint what time is it", false, None);
    settle().await;
    hw.emit_transcription("hey glint what time is it", true, Some("1"));
    settle().await;
    tokio::time::advance(Duration::from_millis(1_600)).await;
    settle().await;

    let types: Vec<String> = {
        let mut seen = Vec::new();
        loop {
            let line = sub.next().await.unwrap();
            let event = parse(&line);
            let ty = event["type"].as_str().unwrap().to_owned();
            let done = ty == "idle";
            seen.push((ty, event));
            if done {
                break;
            }
        }
        seen.iter().map(|(ty, _)| ty.clone()).collect()
    };
    assert_eq!(types, vec!["processing", "message", "message", "idle"]);

    // The user turn landed in history and on the display.
    let user = registry.get("u1").unwrap();
    let turns = user.history().recent_turns(10, None);
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].query, "what time is it");
    assert_eq!(turns[0].response, "It is quarter past three.");
    assert_eq!(hw.displayed(), vec!["It is quarter past three."]);
    assert_eq!(hw.spoken(), vec!["It is quarter past three."]);

    // Camera glasses capture a photo per turn.
    assert!(turns[0].had_photo);
    assert!(!agent.requests()[0].photos.is_empty());
}

#[tokio::test(start_paused = true)]
async fn late_subscriber_replays_the_in_flight_turn_in_order() {
    let agent = ScriptedAgent::with_response("the answer");
    agent.set_delay(Some(Duration::from_secs(5)));
    let lifecycle = make_core(Arc::clone(&agent));
    let hw = MockHardware::display_glasses();

    lifecycle.on_session(hw.clone(), "u1").await;
    hw.emit_transcription("hey glint what time is it", true, Some("1"));
    settle().await;
    tokio::time::advance(Duration::from_millis(1_600)).await;
    settle().await;

    // Pipeline is now waiting on the agent; subscribe mid-flight.
    let registry = lifecycle.registry();
    let mut sub = registry.bus().subscribe("u1", Topic::Chat);
    assert!(sub.flushed_pending, "in-flight events must be queued");

    tokio::time::advance(Duration::from_secs(6)).await;
    settle().await;

    let mut types = Vec::new();
    loop {
        let line = sub.next().await.unwrap();
        let event = parse(&line);
        let ty = event["type"].as_str().unwrap().to_owned();
        if ty == "message" {
            types.push(format!("message:{}", event["senderId"].as_str().unwrap()));
        } else {
            types.push(ty.clone());
        }
        if ty == "idle" {
            break;
        }
    }
    // The queue flush IS the replay: session start, processing, the user
    // message, then the live agent message and idle. Never a history event.
    assert_eq!(
        types,
        vec![
            "session_started",
            "processing",
            "message:u1",
            "message:glint",
            "idle"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn agent_timeout_substitutes_the_apology() {
    let agent = ScriptedAgent::with_response("too late");
    agent.set_delay(Some(Duration::from_secs(60)));
    let lifecycle = make_core(agent);
    let hw = MockHardware::display_glasses();

    lifecycle.on_session(hw.clone(), "u1").await;
    hw.emit_transcription("hey glint tell me a story", true, Some("1"));
    settle().await;
    tokio::time::advance(Duration::from_millis(1_600)).await;
    settle().await;

    // Default agent deadline is 30s; the scripted agent sleeps 60s.
    tokio::time::advance(Duration::from_secs(31)).await;
    settle().await;

    let registry = lifecycle.registry();
    let user = registry.get("u1").unwrap();
    let turns = user.history().recent_turns(10, None);
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].response, glint::agent::APOLOGY);

    let mut sub = registry.bus().subscribe("u1", Topic::Chat);
    assert!(sub.flushed_pending);
    let mut saw_apology = false;
    let mut saw_idle = false;
    while let Some(line) = sub.try_next() {
        let event = parse(&line);
        if event["type"] == "message" && event["senderId"] == "glint" {
            assert_eq!(event["content"].as_str().unwrap(), glint::agent::APOLOGY);
            saw_apology = true;
        }
        if event["type"] == "idle" {
            saw_idle = true;
        }
    }
    assert!(saw_apology && saw_idle);
}

#[tokio::test(start_paused = true)]
async fn photo_failure_degrades_to_a_text_turn() {
    let agent = ScriptedAgent::with_response("no photo needed");
    let lifecycle = make_core(Arc::clone(&agent));
    let hw = MockHardware::display_glasses();
    hw.set_capture_fails(true);

    lifecycle.on_session(hw.clone(), "u1").await;
    hw.emit_transcription("hey glint hello", true, Some("1"));
    settle().await;
    tokio::time::advance(Duration::from_millis(1_600)).await;
    settle().await;

    let user = lifecycle.registry().get("u1").unwrap();
    let turns = user.history().recent_turns(10, None);
    assert_eq!(turns.len(), 1);
    assert!(!turns[0].had_photo);
    assert!(turns[0].photo_ref.is_none());
    assert!(agent.requests()[0].photos.is_empty());
    assert_eq!(hw.displayed(), vec!["no photo needed"]);
}

#[tokio::test(start_paused = true)]
async fn speaker_only_glasses_get_flattened_speech() {
    let agent = ScriptedAgent::with_response("**Turn left** at the `station`.");
    let lifecycle = make_core(agent);
    let hw = MockHardware::camera_only();

    lifecycle.on_session(hw.clone(), "u1").await;
    hw.emit_transcription("hey glint which way", true, Some("1"));
    settle().await;
    tokio::time::advance(Duration::from_millis(1_600)).await;
    settle().await;

    assert!(hw.displayed().is_empty());
    assert_eq!(hw.spoken(), vec!["Turn left at the station."]);

    // Subscribers still see the original markdown.
    let mut sub = lifecycle.registry().bus().subscribe("u1", Topic::Chat);
    let mut saw_original = false;
    while let Some(line) = sub.try_next() {
        if line.contains("**Turn left**") {
            saw_original = true;
        }
    }
    assert!(saw_original);
}

#[tokio::test(start_paused = true)]
async fn queries_queue_behind_an_in_flight_pipeline() {
    let agent = ScriptedAgent::with_response("first answer");
    agent.set_delay(Some(Duration::from_secs(5)));
    let lifecycle = make_core(Arc::clone(&agent));
    let hw = MockHardware::display_glasses();

    lifecycle.on_session(hw.clone(), "u1").await;

    hw.emit_transcription("hey glint first question", true, Some("1"));
    settle().await;
    tokio::time::advance(Duration::from_millis(1_600)).await;
    settle().await;

    // While the first pipeline waits on the agent, a fresh wake arrives.
    hw.emit_transcription("hey glint second question", true, Some("2"));
    settle().await;
    tokio::time::advance(Duration::from_millis(1_600)).await;
    settle().await;
    agent.set_delay(None);
    agent.set_response("second answer");

    tokio::time::advance(Duration::from_secs(6)).await;
    settle().await;

    let user = lifecycle.registry().get("u1").unwrap();
    let turns = user.history().recent_turns(10, None);
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].query, "first question");
    assert_eq!(turns[1].query, "second question");
}
