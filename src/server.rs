//! HTTP surface: server-sent-event streams plus the REST endpoints the web
//! UI and debug tooling use.
//!
//! Each SSE subscriber registers with the event bus; open-time protocol for
//! the chat topic is connected → history (suppressed when a pending-queue
//! flush already replays the in-flight turn) → queued events → an immediate
//! heartbeat, then live events interleaved with periodic heartbeats.

use crate::bus::{EventBus, Topic};
use crate::error::{GlintError, Result};
use crate::events;
use crate::lifecycle::LifecycleController;
use crate::registry::SessionRegistry;
use crate::settings::SettingsPatch;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderName, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::Stream;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

/// Turns replayed in one `history` event.
const HISTORY_REPLAY_LIMIT: usize = 50;

/// Shared state for axum handlers.
#[derive(Clone)]
struct AppState {
    registry: Arc<SessionRegistry>,
    lifecycle: Arc<LifecycleController>,
}

/// HTTP server for the orchestration core.
pub struct GlintServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl GlintServer {
    /// Bind and start serving in a background task.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP listener cannot bind.
    pub async fn start(lifecycle: Arc<LifecycleController>) -> Result<Self> {
        let registry = Arc::clone(lifecycle.registry());
        let config = registry.config().server.clone();
        let app = router(AppState {
            registry,
            lifecycle,
        });

        let bind_addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| GlintError::Server(format!("bind {bind_addr} failed: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| GlintError::Server(format!("failed to get local addr: {e}")))?;

        info!("glint server listening on http://{addr}/api");

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("server error: {e}");
            }
        });

        Ok(Self { addr, handle })
    }

    /// Address the server is listening on.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Port the server is listening on.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Abort the server task.
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for GlintServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handle_health))
        .route("/api/chat/stream", get(handle_chat_stream))
        .route("/api/transcription-stream", get(handle_transcription_stream))
        .route("/api/photo-stream", get(handle_photo_stream))
        .route("/api/speak", post(handle_speak))
        .route("/api/stop-audio", post(handle_stop_audio))
        .route(
            "/api/theme-preference",
            get(handle_theme_get).post(handle_theme_set),
        )
        .route(
            "/api/settings",
            get(handle_settings_get).patch(handle_settings_patch),
        )
        .route("/api/latest-photo", get(handle_latest_photo))
        .route("/api/photo/{request_id}", get(handle_photo_binary))
        .route("/api/photo-base64/{request_id}", get(handle_photo_base64))
        .route("/api/debug/kill-session", post(handle_kill_session))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query / body shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct UserIdQuery {
    #[serde(rename = "userId")]
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct ChatStreamQuery {
    #[serde(rename = "userId")]
    user_id: String,
    /// Accepted for UI compatibility; messages always carry the agent id.
    #[serde(rename = "recipientId")]
    #[allow(dead_code)]
    recipient_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpeakRequest {
    #[serde(rename = "userId")]
    user_id: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct ThemeRequest {
    theme: String,
}

#[derive(Debug, Deserialize)]
struct KillSessionQuery {
    #[serde(rename = "userId")]
    user_id: String,
    mode: Option<String>,
}

// ---------------------------------------------------------------------------
// SSE streams
// ---------------------------------------------------------------------------

fn sse_line(line: String) -> std::result::Result<Event, Infallible> {
    Ok(Event::default().data(line))
}

fn sse_value(value: &serde_json::Value) -> std::result::Result<Event, Infallible> {
    Ok(Event::default().data(value.to_string()))
}

/// Wrap an event stream with the headers that keep proxies from buffering.
fn sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = std::result::Result<Event, Infallible>> + Send + 'static,
{
    (
        [
            (header::CACHE_CONTROL, "no-cache, no-transform"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    )
        .into_response()
}

fn session_active(registry: &SessionRegistry, user_id: &str) -> bool {
    registry.get(user_id).is_some_and(|user| user.has_session())
}

/// `GET /api/chat/stream?userId` — chat-topic SSE.
async fn handle_chat_stream(
    State(state): State<AppState>,
    Query(query): Query<ChatStreamQuery>,
) -> Response {
    let registry = Arc::clone(&state.registry);
    let bus: Arc<EventBus> = Arc::clone(registry.bus());
    let agent_id = registry.config().agent.agent_id.clone();
    let heartbeat = Duration::from_secs(registry.config().server.heartbeat_secs);
    let user_id = query.user_id;

    let stream = async_stream::stream! {
        let mut sub = bus.subscribe(&user_id, Topic::Chat);
        yield sse_value(&events::connected());

        // A flushed pending queue already replays the in-flight turn;
        // sending history too would duplicate it.
        if !sub.flushed_pending {
            if let Some(user) = registry.get(&user_id) {
                let turns = user.history().recent_turns(HISTORY_REPLAY_LIMIT, None);
                yield sse_value(&events::history(&user_id, &agent_id, &turns));
            }
        }

        while let Some(line) = sub.try_next() {
            yield sse_line(line);
        }

        yield sse_value(&events::session_heartbeat(session_active(&registry, &user_id)));

        let start = tokio::time::Instant::now() + heartbeat;
        let mut ticker = tokio::time::interval_at(start, heartbeat);
        loop {
            let next = tokio::select! {
                line = sub.next() => line,
                _ = ticker.tick() => {
                    Some(events::session_heartbeat(session_active(&registry, &user_id)).to_string())
                }
            };
            match next {
                Some(line) => yield sse_line(line),
                None => break,
            }
        }
    };

    sse_response(stream)
}

/// Open-time protocol shared by the transcription and photo streams:
/// connected → queued events → immediate heartbeat → live + periodic.
fn passthrough_stream(
    state: &AppState,
    user_id: String,
    topic: Topic,
) -> impl Stream<Item = std::result::Result<Event, Infallible>> + Send + 'static {
    let bus: Arc<EventBus> = Arc::clone(state.registry.bus());
    let heartbeat = Duration::from_secs(state.registry.config().server.heartbeat_secs);

    async_stream::stream! {
        let mut sub = bus.subscribe(&user_id, topic);
        yield sse_value(&events::connected());

        while let Some(line) = sub.try_next() {
            yield sse_line(line);
        }

        yield sse_value(&events::heartbeat());

        let start = tokio::time::Instant::now() + heartbeat;
        let mut ticker = tokio::time::interval_at(start, heartbeat);
        loop {
            let next = tokio::select! {
                line = sub.next() => line,
                _ = ticker.tick() => Some(events::heartbeat().to_string()),
            };
            match next {
                Some(line) => yield sse_line(line),
                None => break,
            }
        }
    }
}

/// `GET /api/transcription-stream?userId`.
async fn handle_transcription_stream(
    State(state): State<AppState>,
    Query(query): Query<UserIdQuery>,
) -> Response {
    sse_response(passthrough_stream(&state, query.user_id, Topic::Transcription))
}

/// `GET /api/photo-stream?userId`.
async fn handle_photo_stream(
    State(state): State<AppState>,
    Query(query): Query<UserIdQuery>,
) -> Response {
    sse_response(passthrough_stream(&state, query.user_id, Topic::Photo))
}

// ---------------------------------------------------------------------------
// REST handlers
// ---------------------------------------------------------------------------

async fn handle_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// `POST /api/speak` — hardware speak passthrough.
async fn handle_speak(
    State(state): State<AppState>,
    Json(request): Json<SpeakRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let Some(user) = state.registry.get(&request.user_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "unknown user" })),
        );
    };
    let Some(session) = user.session() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "no hardware session" })),
        );
    };
    match session.speak(&request.text).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "ok": true }))),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

/// `POST /api/stop-audio` — hardware audio stop passthrough.
async fn handle_stop_audio(
    State(state): State<AppState>,
    Json(request): Json<UserIdBody>,
) -> (StatusCode, Json<serde_json::Value>) {
    let session = state
        .registry
        .get(&request.user_id)
        .and_then(|user| user.session());
    let Some(session) = session else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "no hardware session" })),
        );
    };
    match session.stop_audio().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "ok": true }))),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

#[derive(Debug, Deserialize)]
struct UserIdBody {
    #[serde(rename = "userId")]
    user_id: String,
}

async fn handle_theme_get(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "theme": state.registry.settings().global_theme() }))
}

async fn handle_theme_set(
    State(state): State<AppState>,
    Json(request): Json<ThemeRequest>,
) -> Json<serde_json::Value> {
    state.registry.settings().set_global_theme(&request.theme);
    Json(json!({ "theme": request.theme }))
}

/// `GET /api/settings?userId`.
async fn handle_settings_get(
    State(state): State<AppState>,
    Query(query): Query<UserIdQuery>,
) -> Json<serde_json::Value> {
    let settings = state.registry.settings().get(&query.user_id);
    Json(json!(settings))
}

/// `PATCH /api/settings?userId`.
async fn handle_settings_patch(
    State(state): State<AppState>,
    Query(query): Query<UserIdQuery>,
    Json(body): Json<SettingsPatch>,
) -> Json<serde_json::Value> {
    let updated = state.registry.settings().update(&query.user_id, &body);
    if let Some(user) = state.registry.get(&query.user_id) {
        user.history()
            .set_archive_enabled(updated.chat_history_enabled);
    }
    Json(json!(updated))
}

/// `GET /api/latest-photo?userId` — binary body.
async fn handle_latest_photo(
    State(state): State<AppState>,
    Query(query): Query<UserIdQuery>,
) -> Response {
    let photo = state
        .registry
        .get(&query.user_id)
        .and_then(|user| user.photos().latest());
    match photo {
        Some(photo) => (
            [(header::CONTENT_TYPE, photo.mime_type.clone())],
            photo.bytes.clone(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "no photo").into_response(),
    }
}

/// `GET /api/photo/{requestId}` — binary body.
async fn handle_photo_binary(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Response {
    match state.registry.find_photo(&request_id) {
        Some(photo) => (
            [(header::CONTENT_TYPE, photo.mime_type.clone())],
            photo.bytes.clone(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "unknown photo").into_response(),
    }
}

/// `GET /api/photo-base64/{requestId}` — text body.
async fn handle_photo_base64(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Response {
    match state.registry.find_photo(&request_id) {
        Some(photo) => (
            [(header::CONTENT_TYPE, "text/plain")],
            BASE64.encode(&photo.bytes),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "unknown photo").into_response(),
    }
}

/// `POST /api/debug/kill-session?userId&mode=soft|hard` — dev-only.
async fn handle_kill_session(
    State(state): State<AppState>,
    Query(query): Query<KillSessionQuery>,
) -> (StatusCode, Json<serde_json::Value>) {
    match query.mode.as_deref().unwrap_or("soft") {
        "hard" => {
            state.registry.bus().broadcast(
                &query.user_id,
                Topic::Chat,
                &events::session_ended("killed"),
            );
            state.registry.bus().clear_pending(&query.user_id);
            state.registry.remove(&query.user_id);
            (StatusCode::OK, Json(json!({ "killed": "hard" })))
        }
        "soft" => {
            state.lifecycle.on_stop(&query.user_id, "killed");
            (StatusCode::OK, Json(json!({ "killed": "soft" })))
        }
        other => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("unknown mode: {other}") })),
        ),
    }
}
