//! # Worker Task Handlers
//!
//! The two calls a worker container makes back into the pipeline: pull its
//! task config and report health or failure.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::Value;

use crate::dispatcher::WorkerReport;
use crate::web::extractors::WorkerAuth;
use crate::web::response_types::ApiResult;
use crate::web::state::AppState;

/// GET /pipelines/worker-tasks/:task_id
pub async fn get_task_config(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    WorkerAuth(credential): WorkerAuth,
) -> ApiResult<Json<Value>> {
    let config = state
        .dispatcher
        .pull_task_config(&task_id, &credential)
        .await?;
    Ok(Json(config))
}

/// POST /pipelines/worker-tasks/:task_id/report
pub async fn report_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    WorkerAuth(credential): WorkerAuth,
    Json(report): Json<WorkerReport>,
) -> ApiResult<StatusCode> {
    state
        .dispatcher
        .report(&task_id, &credential, &report)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
