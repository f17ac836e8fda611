//! # Health Check Handlers
//!
//! Kubernetes-compatible probes.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::web::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
}

/// Basic health check endpoint: GET /health
pub async fn basic_health(_state: State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Kubernetes liveness probe: GET /health/live
pub async fn liveness_probe(State(state): State<AppState>) -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "alive".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}
