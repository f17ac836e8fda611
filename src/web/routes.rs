//! # Web API Route Definitions

use axum::routing::{get, post};
use axum::Router;

use crate::web::handlers;
use crate::web::state::AppState;

/// Worker callback routes, authenticated per request by worker credential
pub fn worker_task_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/pipelines/worker-tasks/:task_id",
            get(handlers::worker_tasks::get_task_config),
        )
        .route(
            "/pipelines/worker-tasks/:task_id/report",
            post(handlers::worker_tasks::report_task),
        )
}

pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health::basic_health))
        .route("/health/live", get(handlers::health::liveness_probe))
}
