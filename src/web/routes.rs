//! Route handlers for the pairing API.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::pairing::PairingService;
use crate::supervisor::ConnectionSupervisor;

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub pairing: PairingService,
    pub supervisor: Arc<ConnectionSupervisor>,
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/request-pairing", post(request_pairing))
        .route("/api/status/{number}", get(pairing_status))
        .route("/api/cleanup", get(cleanup))
        .route("/api/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct PairingSubmission {
    number: String,
}

async fn request_pairing(
    State(state): State<AppState>,
    Json(body): Json<PairingSubmission>,
) -> Response {
    match state.pairing.submit(&body.number).await {
        Ok(number) => Json(json!({
            "success": true,
            "number": number,
            "message": "Number received, pairing code will be generated shortly",
        }))
        .into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn pairing_status(State(state): State<AppState>, Path(number): Path<String>) -> Response {
    match state.pairing.status(&number).await {
        Some(request) => Json(request).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Number not found in active requests" })),
        )
            .into_response(),
    }
}

async fn cleanup(State(state): State<AppState>) -> Response {
    state.pairing.clear().await;
    Json(json!({ "success": true, "message": "Cleanup completed" })).into_response()
}

async fn health(State(state): State<AppState>) -> Response {
    let connection = state.supervisor.state().await;
    Json(json!({
        "status": "OK",
        "timestamp": Utc::now().to_rfc3339(),
        "connection": connection.phase.to_string(),
    }))
    .into_response()
}
