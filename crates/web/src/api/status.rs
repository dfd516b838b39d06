//! Health endpoint and the shared API error type.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use branchsync_core::errors::{EngineError, ValidationError};

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: String,
    uptime_secs: u64,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/status/health", get(health_check))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let uptime = (Utc::now() - state.started_at).num_seconds().max(0) as u64;
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: uptime,
    })
}

// ---------------------------------------------------------------------------
// Shared error type for API handlers
// ---------------------------------------------------------------------------

/// Simple API error type that converts to an Axum response.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    /// The remote repository could not be reached or refused us.
    BadGateway(String),
    Internal(String),
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(e) => e.into(),
            e if e.is_remote() => AppError::BadGateway(e.to_string()),
            e => AppError::Internal(e.to_string()),
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        if status.is_server_error() {
            warn!(status = %status, error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
