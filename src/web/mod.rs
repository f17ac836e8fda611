//! # Web API Module
//!
//! Axum endpoints served to worker containers plus health probes.
//!
//! - [`routes`] - route tables
//! - [`handlers`] - request handlers per endpoint group
//! - [`extractors`] - worker Basic credential extraction
//! - [`response_types`] - `ApiError` and its JSON rendering

pub mod extractors;
pub mod handlers;
pub mod response_types;
pub mod routes;
pub mod state;

use axum::Router;

pub use response_types::{ApiError, ApiResult};
pub use state::AppState;

/// Create the Axum application with all routes and the trace layer
pub fn create_app(app_state: AppState) -> Router {
    Router::new()
        .merge(routes::health_routes())
        .merge(routes::worker_task_routes())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(app_state)
}
