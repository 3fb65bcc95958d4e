//! HTTP control surface
//!
//! JSON endpoints gating room entry plus operational state, and the
//! WebSocket upgrade route. Every `/api/*` response carries a
//! machine-readable `success` verdict and a human `message` where one
//! helps. CORS is permissive because the relay is a rendezvous service
//! for browser peers; payload security lives in the WebRTC DTLS layer,
//! not in origin checks.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::error;

use chuan_turn::TurnService;

use crate::frontend;
use crate::registry::RoomRegistry;
use crate::websocket;

/// Per-request handler deadline (HTTP only; WebSocket frames have
/// their own deadlines once upgraded).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Preflight cache lifetime.
const CORS_MAX_AGE: Duration = Duration::from_secs(300);

/// Shared state behind every handler.
pub struct AppState {
    pub registry: Arc<RoomRegistry>,
    /// Present only when TURN is enabled by configuration.
    pub turn: Option<Arc<TurnService>>,
    /// External static root; `None` falls back to the embedded page.
    pub frontend_dir: Option<PathBuf>,
    /// Shutdown signal observed by every per-socket task.
    pub cancel: CancellationToken,
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .max_age(CORS_MAX_AGE);

    Router::new()
        .route("/api/create-room", post(create_room))
        .route("/api/room-info", get(room_info))
        .route("/api/ws/webrtc", get(websocket::ws_handler))
        .route("/api/turn/stats", get(turn_stats))
        .route("/api/turn/config", get(turn_config))
        .route("/api/admin/status", get(admin_status))
        .route("/health", get(health_handler))
        .fallback(frontend::serve)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CatchPanicLayer::new())
        .layer(cors)
        .with_state(state)
}

/// JSON verdict used by every failing `/api/*` response.
#[derive(Debug, Serialize)]
pub(crate) struct ErrorBody {
    pub success: bool,
    pub message: String,
}

/// Build a `{success:false, message}` response with the given status.
pub(crate) fn error_body(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            success: false,
            message: message.to_string(),
        }),
    )
        .into_response()
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn method_not_allowed() -> Response {
    error_body(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
}

#[derive(Debug, Serialize)]
struct CreateRoomBody {
    success: bool,
    code: String,
    message: &'static str,
}

/// `POST /api/create-room`. The request body is ignored.
async fn create_room(State(state): State<Arc<AppState>>) -> Response {
    match state.registry.create() {
        Ok(code) => Json(CreateRoomBody {
            success: true,
            code,
            message: "room created",
        })
        .into_response(),
        Err(err) => {
            error!(%err, "room allocation failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct RoomInfoQuery {
    code: Option<String>,
}

#[derive(Debug, Serialize)]
struct RoomInfoBody {
    success: bool,
    code: String,
    is_room_full: bool,
    sender_online: bool,
    receiver_online: bool,
}

/// `GET /api/room-info?code=…`
///
/// Verdicts, in order: missing/malformed code, unknown or closed code,
/// expired (reported before the sweep closes it), then occupancy.
async fn room_info(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RoomInfoQuery>,
) -> Response {
    let Some(code) = query.code.as_deref() else {
        return error_body(StatusCode::BAD_REQUEST, "missing room code");
    };
    let Some(room) = state.registry.lookup(code) else {
        return error_body(StatusCode::NOT_FOUND, "room not found");
    };

    let info = room.info();
    if info.expired {
        return (
            StatusCode::GONE,
            Json(json!({
                "success": false,
                "code": room.code(),
                "expired": true,
                "message": "room has expired",
            })),
        )
            .into_response();
    }

    Json(RoomInfoBody {
        success: true,
        code: room.code().to_string(),
        is_room_full: info.transferring,
        sender_online: info.sender_online,
        receiver_online: info.receiver_online,
    })
    .into_response()
}

/// `GET /api/turn/stats`
async fn turn_stats(State(state): State<Arc<AppState>>) -> Response {
    let Some(turn) = state.turn.as_ref() else {
        return error_body(StatusCode::NOT_FOUND, "TURN service disabled");
    };
    let mut data = serde_json::to_value(turn.stats()).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut data {
        map.insert("state".into(), json!(turn.lifecycle().await.to_string()));
    }
    Json(json!({ "success": true, "data": data })).into_response()
}

/// `GET /api/turn/config`: the ICE descriptor clients embed.
async fn turn_config(State(state): State<Arc<AppState>>) -> Response {
    let Some(turn) = state.turn.as_ref() else {
        return error_body(StatusCode::NOT_FOUND, "TURN service disabled");
    };
    match turn.descriptor().await {
        Some(descriptor) => {
            Json(json!({ "success": true, "data": descriptor })).into_response()
        }
        None => error_body(StatusCode::SERVICE_UNAVAILABLE, "TURN service not running"),
    }
}

/// `GET /api/admin/status`: registry health plus TURN snapshot.
async fn admin_status(State(state): State<Arc<AppState>>) -> Response {
    let turn = match state.turn.as_ref() {
        None => json!({ "enabled": false }),
        Some(turn) => json!({
            "enabled": true,
            "state": turn.lifecycle().await.to_string(),
            "stats": turn.stats(),
        }),
    };
    Json(json!({
        "success": true,
        "data": {
            "webrtc": { "active_rooms": state.registry.len() },
            "turn": turn,
        },
    }))
    .into_response()
}
