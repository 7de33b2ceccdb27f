//! HTTP API for ragdesk.
//!
//! Endpoints:
//!
//! - `GET  /`            : welcome message
//! - `POST /chat`        : send a message, get `{"utterance": ...}`
//! - `POST /chat/stream` : same, as an SSE stream of `chunk` events and a final `done`
//! - `POST /reset`       : clear a session's history, get `{"status": bool}`
//! - `GET  /health`      : liveness probe
//!
//! The session is picked from the `X-Session-Id` header, then the body's
//! `session_id`, then the shared `"default"` session.
//!
//! Built on Axum.

pub mod bootstrap;
pub mod sessions;

#[cfg(test)]
mod test_support;

use std::any::Any;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::sse::{Event as SseEvent, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use ragdesk_agent::SessionFactory;
use ragdesk_config::{AppConfig, GatewayConfig};
use ragdesk_core::message::SessionId;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any as AnyOrigin, CorsLayer};
use tracing::{error, info, warn};

pub use bootstrap::{BootstrapError, KnowledgeBackend, Services};
pub use sessions::SessionRegistry;

pub const WELCOME: &str =
    "Welcome to the Chat API. Use /chat to send messages and /reset to reset the chat state.";

const SESSION_HEADER: &str = "x-session-id";
const MAX_BODY_BYTES: usize = 1024 * 1024;
const SWEEP_PERIOD: Duration = Duration::from_secs(60);

/// Shared application state for the gateway.
pub struct GatewayState {
    pub sessions: Arc<SessionRegistry>,
}

pub type SharedState = Arc<GatewayState>;

// --- Wire types ---

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResetRequest {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub utterance: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetResponse {
    pub status: bool,
}

#[derive(Serialize)]
struct WelcomeResponse {
    message: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// An error rendered as `{"detail": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "detail": self.detail }))).into_response()
    }
}

// --- Router ---

/// Build the router with all routes and layers.
///
/// Layers, outermost first:
/// - HTTP trace logging (when `trace_requests` is on)
/// - CORS from `cors_allow_origins`
/// - Request body size limit (1 MB)
/// - Panic → 500 `{"detail":"Internal Server Error"}`
pub fn build_router(state: SharedState, config: &GatewayConfig) -> Router {
    let router = Router::new()
        .route("/", get(root_handler))
        .route("/chat", post(chat_handler))
        .route("/chat/stream", post(chat_stream_handler))
        .route("/reset", post(reset_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors_layer(config));

    if config.trace_requests {
        router.layer(tower_http::trace::TraceLayer::new_for_http())
    } else {
        router
    }
}

fn cors_layer(config: &GatewayConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(AnyOrigin)
        .allow_headers(AnyOrigin);

    if config.cors_allows_any() {
        return layer.allow_origin(AnyOrigin);
    }

    let origins: Vec<HeaderValue> = config
        .cors_allow_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let reason = payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| payload.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(reason = %reason, "Handler panicked");

    ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        detail: "Internal Server Error".into(),
    }
    .into_response()
}

/// Header first, then body, then the shared session.
fn session_key(headers: &HeaderMap, body: Option<&str>) -> String {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| body.map(str::trim).filter(|v| !v.is_empty()))
        .unwrap_or(SessionId::DEFAULT)
        .to_string()
}

/// Validate a chat body and resolve its session key and message.
fn chat_input(
    headers: &HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<(String, String), ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "Rejected chat body");
        ApiError::bad_request(rejection.body_text())
    })?;

    let message = match request.message {
        Some(m) if !m.trim().is_empty() => m,
        Some(_) => {
            warn!("Rejected empty chat message");
            return Err(ApiError::bad_request("Field 'message' must not be empty"));
        }
        None => {
            warn!("Rejected chat body without message");
            return Err(ApiError::bad_request("Field 'message' is required"));
        }
    };

    Ok((session_key(headers, request.session_id.as_deref()), message))
}

// --- Handlers ---

async fn root_handler() -> Json<WelcomeResponse> {
    Json(WelcomeResponse { message: WELCOME })
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn chat_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let (key, message) = chat_input(&headers, payload)?;
    info!(session = %key, message_len = message.len(), "Chat request");

    let session = state.sessions.get_or_create(&key).await;
    let utterance = session.chat(&message).await;
    Ok(Json(ChatResponse { utterance }))
}

async fn chat_stream_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let (key, message) = chat_input(&headers, payload)?;
    info!(session = %key, message_len = message.len(), "Streaming chat request");

    let session = state.sessions.get_or_create(&key).await;
    let rx = session.stream_chat(&message).await;

    let stream = ReceiverStream::new(rx)
        .map(|chunk| Ok::<_, Infallible>(SseEvent::default().event("chunk").data(chunk)))
        .chain(tokio_stream::once(Ok(SseEvent::default().event("done").data(""))));

    Ok(Sse::new(stream))
}

async fn reset_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ResetResponse>, ApiError> {
    let request: ResetRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ResetRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            warn!(error = %e, "Rejected reset body");
            ApiError::bad_request(format!("Invalid JSON body: {e}"))
        })?
    };

    let key = session_key(&headers, request.session_id.as_deref());
    // An unknown session has nothing to clear
    let status = match state.sessions.get(&key).await {
        Some(session) => session.reset().await,
        None => true,
    };

    info!(session = %key, status, "Reset request");
    Ok(Json(ResetResponse { status }))
}

// --- Server ---

/// Send one throwaway chat in the background so the first real request
/// does not pay for cold connections.
pub fn spawn_warm_up(factory: &SessionFactory) -> JoinHandle<String> {
    let session = factory.create(SessionId::new());
    tokio::spawn(async move {
        info!("Warming up");
        let answer = session.chat("Hello!").await;
        info!(answer_len = answer.len(), "Warm-up finished");
        answer
    })
}

/// Start the HTTP server and serve until Ctrl-C.
pub async fn start(config: AppConfig, backend: KnowledgeBackend) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let services = Services::build(&config, backend).await?;
    let factory = services.session_factory(&config);

    if config.gateway.warm_up {
        spawn_warm_up(&factory);
    }

    let sessions = Arc::new(SessionRegistry::new(
        factory,
        Duration::from_secs(config.session.idle_timeout_secs),
        config.session.max_sessions,
    ));
    let sweeper = sessions.spawn_sweeper(SWEEP_PERIOD);

    let app = build_router(Arc::new(GatewayState { sessions }), &config.gateway);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    sweeper.abort();
    Ok(())
}
