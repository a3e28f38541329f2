use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use formpilot_session_recovery::KeeperState;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::metrics;
use crate::server::ServeState;

pub fn build_router(state: ServeState) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/api/status", get(status_handler))
        .route("/api/events", get(events_handler))
        .route("/api/recover", post(recover_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Liveness plus a degraded signal: a critically failed keeper answers 503
/// so orchestration layers stop routing jobs here.
async fn health_handler(State(state): State<ServeState>) -> Response {
    let status = state.service.status();
    if status.keeper.state == KeeperState::CriticallyFailed {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "critically_failed" })),
        )
            .into_response()
    } else {
        Json(json!({ "status": "ok" })).into_response()
    }
}

async fn status_handler(State(state): State<ServeState>) -> Response {
    Json(state.service.status()).into_response()
}

async fn events_handler(State(state): State<ServeState>) -> Response {
    Json(state.service.events()).into_response()
}

/// Manual repair trigger; also clears the terminal state.
async fn recover_handler(State(state): State<ServeState>) -> Response {
    let recovered = state.service.force_recover().await;
    let code = if recovered {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(json!({ "recovered": recovered }))).into_response()
}
