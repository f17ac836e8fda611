//! Worker pull/report protocol over HTTP.

mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::*;
use metaspace_pipeline::coordinator::DeploySiteRequest;
use metaspace_pipeline::dispatcher::WorkerCredential;
use metaspace_pipeline::events::PipelineEvent;
use metaspace_pipeline::models::{SiteStatus, WorkerJob, WorkerJobState};
use metaspace_pipeline::store::WorkerJobStore;
use metaspace_pipeline::web::{create_app, AppState};

async fn deployed_job(h: &Harness, site_config_id: i64) -> WorkerJob {
    let dispatch = h
        .sites
        .deploy_site(DeploySiteRequest::unsigned(USER_ID, site_config_id))
        .await
        .unwrap();
    h.store
        .list_worker_jobs(&dispatch.task_id)
        .await
        .unwrap()
        .remove(0)
}

fn credential(job: &WorkerJob) -> WorkerCredential {
    WorkerCredential::new(job.worker_name.clone(), job.worker_secret.clone())
}

fn app(h: &Harness) -> Router {
    create_app(AppState::new(h.dispatcher.clone()))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    // extractor rejections from axum itself are plain text
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn pull(task_id: &str, authorization: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::GET)
        .uri(format!("/pipelines/worker-tasks/{task_id}"));
    if let Some(value) = authorization {
        builder = builder.header(header::AUTHORIZATION, value);
    }
    builder.body(Body::empty()).unwrap()
}

fn report(task_id: &str, authorization: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(format!("/pipelines/worker-tasks/{task_id}/report"))
        .header(header::AUTHORIZATION, authorization)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_worker_pulls_its_config() {
    let h = Harness::new();
    let job = deployed_job(&h, SITE_ID).await;

    let (status, body) = send(
        app(&h),
        pull(&job.task_id, Some(&credential(&job).to_basic_header())),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["task"]["taskId"], job.task_id.as_str());
    assert_eq!(body["task"]["taskMethod"], "DEPLOY_SITE");
    assert_eq!(body["gitInfo"]["gitToken"], "ghp_test");
    assert_eq!(body["siteInfo"]["title"], "Alice's notes");
}

#[tokio::test]
async fn test_credential_of_another_task_is_rejected() {
    let h = Harness::new();
    h.insert_site(SiteBuilder::new().with_id(SITE_ID + 1).build());
    let ours = deployed_job(&h, SITE_ID).await;
    let theirs = deployed_job(&h, SITE_ID + 1).await;

    let (status, body) = send(
        app(&h),
        pull(&theirs.task_id, Some(&credential(&ours).to_basic_header())),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    assert!(!body.to_string().contains(&ours.worker_secret));
}

#[tokio::test]
async fn test_wrong_secret_is_rejected() {
    let h = Harness::new();
    let job = deployed_job(&h, SITE_ID).await;
    let forged = WorkerCredential::new(job.worker_name.clone(), "not-the-secret");

    let (status, _) = send(app(&h), pull(&job.task_id, Some(&forged.to_basic_header()))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let unknown = WorkerCredential::new("pipeline-worker-unknown", job.worker_secret.clone());
    let (status, _) = send(app(&h), pull(&job.task_id, Some(&unknown.to_basic_header()))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_missing_or_malformed_header_is_rejected() {
    let h = Harness::new();
    let job = deployed_job(&h, SITE_ID).await;

    for authorization in [None, Some("Bearer abc"), Some("Basic %%%"), Some("Basic bm9jb2xvbg==")] {
        let (status, body) = send(app(&h), pull(&job.task_id, authorization)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "header {authorization:?}");
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }
}

#[tokio::test]
async fn test_health_check_report_is_recorded() {
    let h = Harness::new();
    let job = deployed_job(&h, SITE_ID).await;
    let timestamp = 1_700_000_000_000i64;

    let (status, _) = send(
        app(&h),
        report(
            &job.task_id,
            &credential(&job).to_basic_header(),
            json!({ "reason": "HEALTH_CHECK", "data": { "step": 1 }, "timestamp": timestamp }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let stored = h.store.get_worker_job(&job.worker_name).await.unwrap().unwrap();
    assert_eq!(
        stored.last_health_check_at.map(|at| at.timestamp_millis()),
        Some(timestamp)
    );
    assert_eq!(stored.state, WorkerJobState::Queued);
}

#[tokio::test]
async fn test_errored_report_fails_the_deploy() {
    let h = Harness::new();
    let job = deployed_job(&h, SITE_ID).await;

    let (status, _) = send(
        app(&h),
        report(
            &job.task_id,
            &credential(&job).to_basic_header(),
            json!({ "reason": "ERRORED", "data": "hexo generate failed", "timestamp": 0 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    h.settle().await;

    assert_eq!(h.site_source.status(SITE_ID), Some(SiteStatus::DeployFailed));
    assert!(h.processor.executed().is_empty());
    let stored = h.store.get_worker_job(&job.worker_name).await.unwrap().unwrap();
    assert_eq!(stored.state, WorkerJobState::Errored);
    assert!(h.handled_events().iter().any(|event| matches!(
        event,
        PipelineEvent::WorkerErrored { reason, .. } if reason == "hexo generate failed"
    )));
}

#[tokio::test]
async fn test_report_with_bad_body_is_client_error() {
    let h = Harness::new();
    let job = deployed_job(&h, SITE_ID).await;

    let (status, _) = send(
        app(&h),
        report(
            &job.task_id,
            &credential(&job).to_basic_header(),
            json!({ "reason": "NAPPING", "timestamp": 0 }),
        ),
    )
    .await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_health_endpoints() {
    let h = Harness::new();

    let (status, body) = send(
        app(&h),
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(
        app(&h),
        Request::builder()
            .uri("/health/live")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "alive");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}
