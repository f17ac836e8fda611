use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::queue::JobQueue;
use super::steps::TaskStep;
use super::task_config::{DomainConfig, QueuedJob, TaskDescriptor, WorkerTaskConfig};
use crate::constants::system;
use crate::error::{PipelineError, Result};
use crate::events::{EventPublisher, PipelineEvent};
use crate::logging::log_worker_operation;
use crate::models::{PipelineTask, TaskWorkspace, TemplateType, WorkerJob, WorkerJobState};
use crate::store::PipelineStore;

/// `workerName:secret` capability presented by a worker
#[derive(Clone, PartialEq, Eq)]
pub struct WorkerCredential {
    pub worker_name: String,
    pub secret: String,
}

impl std::fmt::Debug for WorkerCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerCredential")
            .field("worker_name", &self.worker_name)
            .finish_non_exhaustive()
    }
}

impl WorkerCredential {
    pub fn new(worker_name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            worker_name: worker_name.into(),
            secret: secret.into(),
        }
    }

    /// Parse an `Authorization: Basic base64(workerName:secret)` header value
    pub fn from_basic_header(header: &str) -> Result<Self> {
        let encoded = header
            .strip_prefix("Basic ")
            .ok_or_else(|| PipelineError::unauthorized("Expected Basic credentials"))?;
        let decoded = BASE64
            .decode(encoded.trim())
            .map_err(|_| PipelineError::unauthorized("Malformed credentials"))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| PipelineError::unauthorized("Malformed credentials"))?;
        let (worker_name, secret) = decoded
            .split_once(':')
            .ok_or_else(|| PipelineError::unauthorized("Malformed credentials"))?;
        Ok(Self::new(worker_name, secret))
    }

    pub fn to_basic_header(&self) -> String {
        format!(
            "Basic {}",
            BASE64.encode(format!("{}:{}", self.worker_name, self.secret))
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportReason {
    HealthCheck,
    Errored,
}

/// Body of `POST /pipelines/worker-tasks/{taskId}/report`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub reason: ReportReason,
    #[serde(default)]
    pub data: Value,
    /// Milliseconds since the epoch
    pub timestamp: i64,
}

impl WorkerReport {
    fn reported_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp)
            .single()
            .unwrap_or_else(Utc::now)
    }

    fn reason_text(&self) -> String {
        match &self.data {
            Value::String(message) => message.clone(),
            Value::Null => "worker reported an error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Handle of a queued job
#[derive(Debug, Clone)]
pub struct DispatchedJob {
    pub task_id: String,
    pub worker_name: String,
    pub message_id: i64,
    pub is_last_task: bool,
    /// Returned once so the caller can hand it to a processor
    pub credential: WorkerCredential,
}

/// Turns tasks into queued jobs and serves the worker pull/report protocol
#[derive(Clone)]
pub struct TaskDispatcher {
    store: Arc<dyn PipelineStore>,
    queue: Arc<dyn JobQueue>,
    events: EventPublisher,
}

impl std::fmt::Debug for TaskDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDispatcher")
            .field("queue", &self.queue.queue_name())
            .finish_non_exhaustive()
    }
}

impl TaskDispatcher {
    pub fn new(store: Arc<dyn PipelineStore>, queue: Arc<dyn JobQueue>, events: EventPublisher) -> Self {
        Self {
            store,
            queue,
            events,
        }
    }

    /// The workspace of the site, provided `task_id` is the task holding it
    pub async fn check_and_get_site_config_task_workspace(
        &self,
        site_config_id: i64,
        task_id: &str,
    ) -> Result<TaskWorkspace> {
        match self.store.find_active_site_task(site_config_id).await? {
            Some(holder) if holder.id == task_id => Ok(TaskWorkspace::new(
                holder.user_id,
                site_config_id,
                holder.id,
            )),
            Some(holder) => Err(PipelineError::WorkspaceLocked {
                site_config_id,
                task_id: holder.id,
            }),
            None => Err(PipelineError::validation(format!(
                "Task {task_id} does not hold the workspace of site config {site_config_id}"
            ))),
        }
    }

    /// Queue one job of `task`.
    ///
    /// Persists the worker job and the task's worker credential before the
    /// message is sent, so a worker can never pull a config that is not on
    /// record. A send failure marks the job `ERRORED` and surfaces as a worker
    /// execution error.
    pub async fn dispatch_task(
        &self,
        task: &PipelineTask,
        template: TemplateType,
        steps: Vec<TaskStep>,
        domain: DomainConfig,
        is_last_task: bool,
    ) -> Result<DispatchedJob> {
        self.check_and_get_site_config_task_workspace(task.site_config_id, &task.id)
            .await?;

        let worker_name = format!("{}{}", system::WORKER_NAME_PREFIX, Uuid::new_v4());
        let worker_secret = generate_worker_secret();

        let queued = QueuedJob {
            worker_name: worker_name.clone(),
            template,
            task_config: WorkerTaskConfig {
                domain,
                task: TaskDescriptor {
                    task_id: task.id.clone(),
                    task_method: task.method,
                    task_steps: steps,
                    is_last_task,
                },
            },
        };

        let now = Utc::now();
        let job = WorkerJob {
            worker_name: worker_name.clone(),
            task_id: task.id.clone(),
            worker_secret: worker_secret.clone(),
            template,
            task_config: serde_json::to_value(&queued.task_config)?,
            is_last_task,
            state: WorkerJobState::Queued,
            last_health_check_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.save_worker_job(&job).await?;
        self.store
            .assign_task_worker(&task.id, &worker_name, &worker_secret)
            .await?;

        let message_id = match self.queue.enqueue(&queued).await {
            Ok(id) => id,
            Err(e) => {
                error!(task_id = %task.id, worker_name = %worker_name, error = %e, "Failed to enqueue worker job");
                self.store
                    .update_worker_job_state(&worker_name, WorkerJobState::Errored)
                    .await?;
                return Err(PipelineError::worker_execution(format!(
                    "Failed to enqueue job for task {}: {e}",
                    task.id
                )));
            }
        };

        log_worker_operation(
            "dispatch",
            &worker_name,
            &task.id,
            "queued",
            Some(&format!("message_id={message_id} is_last_task={is_last_task}")),
        );

        Ok(DispatchedJob {
            task_id: task.id.clone(),
            worker_name: worker_name.clone(),
            message_id,
            is_last_task,
            credential: WorkerCredential::new(worker_name, worker_secret),
        })
    }

    /// Release the task config to the worker that owns the job
    pub async fn pull_task_config(&self, task_id: &str, credential: &WorkerCredential) -> Result<Value> {
        let job = self.authenticate(task_id, credential).await?;
        log_worker_operation("pull", &job.worker_name, task_id, "released", None);
        Ok(job.task_config)
    }

    pub async fn report(
        &self,
        task_id: &str,
        credential: &WorkerCredential,
        report: &WorkerReport,
    ) -> Result<()> {
        let job = self.authenticate(task_id, credential).await?;
        match report.reason {
            ReportReason::HealthCheck => {
                self.store
                    .record_worker_health_check(&job.worker_name, report.reported_at())
                    .await?;
                log_worker_operation("report", &job.worker_name, task_id, "health_check", None);
            }
            ReportReason::Errored => {
                let reason = report.reason_text();
                self.store
                    .update_worker_job_state(&job.worker_name, WorkerJobState::Errored)
                    .await?;
                warn!(task_id, worker_name = %job.worker_name, reason = %reason, "Worker reported an error");
                self.events.publish(PipelineEvent::WorkerErrored {
                    task_id: task_id.to_string(),
                    worker_name: job.worker_name.clone(),
                    reason,
                });
            }
        }
        Ok(())
    }

    /// The stored job must belong to the credential's worker name, carry the
    /// same secret and be a job of `task_id`.
    async fn authenticate(&self, task_id: &str, credential: &WorkerCredential) -> Result<WorkerJob> {
        let job = self
            .store
            .get_worker_job(&credential.worker_name)
            .await?
            .ok_or_else(|| PipelineError::unauthorized("Unknown worker"))?;

        let secret_matches: bool = job
            .worker_secret
            .as_bytes()
            .ct_eq(credential.secret.as_bytes())
            .into();
        if !secret_matches {
            return Err(PipelineError::unauthorized("Invalid worker secret"));
        }
        if job.task_id != task_id {
            warn!(
                worker_name = %credential.worker_name,
                requested_task = task_id,
                "Worker requested a task it does not own"
            );
            return Err(PipelineError::unauthorized("Worker does not own this task"));
        }
        info!(worker_name = %job.worker_name, task_id, "🔑 Worker authenticated");
        Ok(job)
    }
}

fn generate_worker_secret() -> String {
    let mut bytes = [0u8; system::WORKER_SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::queue::InMemoryJobQueue;
    use crate::models::TaskMethod;
    use crate::store::{InMemoryPipelineStore, TaskStore, WorkerJobStore};

    async fn setup() -> (
        TaskDispatcher,
        Arc<InMemoryPipelineStore>,
        Arc<InMemoryJobQueue>,
        PipelineTask,
    ) {
        let store = Arc::new(InMemoryPipelineStore::new());
        let queue = Arc::new(InMemoryJobQueue::new("jobs"));
        let dispatcher = TaskDispatcher::new(store.clone(), queue.clone(), EventPublisher::default());
        let task = PipelineTask::new(TaskMethod::DeploySite, 1, 10);
        store.create_task(&task).await.unwrap();
        (dispatcher, store, queue, task)
    }

    #[test]
    fn test_credential_header_round_trip() {
        let credential = WorkerCredential::new("pipeline-worker-1", "s3cret:with-colon");
        let header = credential.to_basic_header();
        assert!(header.starts_with("Basic "));
        assert_eq!(WorkerCredential::from_basic_header(&header).unwrap(), credential);
        assert!(matches!(
            WorkerCredential::from_basic_header("Bearer abc"),
            Err(PipelineError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_dispatch_persists_job_and_enqueues() {
        let (dispatcher, store, queue, task) = setup().await;
        let dispatched = dispatcher
            .dispatch_task(
                &task,
                TemplateType::Hexo,
                vec![TaskStep::GitInitPush],
                DomainConfig::new(),
                true,
            )
            .await
            .unwrap();

        assert!(dispatched.worker_name.starts_with("pipeline-worker-"));
        assert_eq!(dispatched.credential.secret.len(), 64);
        assert_eq!(queue.len(), 1);

        let job = store
            .get_worker_job(&dispatched.worker_name)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.state, WorkerJobState::Queued);
        assert_eq!(job.task_config["task"]["taskId"], task.id.as_str());

        let stored = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.worker_name, dispatched.worker_name);
    }

    #[tokio::test]
    async fn test_dispatch_for_task_not_holding_workspace_is_rejected() {
        let (dispatcher, _store, _queue, _task) = setup().await;
        let intruder = PipelineTask::new(TaskMethod::PublishSite, 1, 10);
        let err = dispatcher
            .dispatch_task(&intruder, TemplateType::Hexo, vec![], DomainConfig::new(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::WorkspaceLocked { site_config_id: 10, .. }));
    }

    #[tokio::test]
    async fn test_pull_requires_matching_secret_and_task() {
        let (dispatcher, _store, _queue, task) = setup().await;
        let dispatched = dispatcher
            .dispatch_task(&task, TemplateType::Hugo, vec![], DomainConfig::new(), true)
            .await
            .unwrap();

        let config = dispatcher
            .pull_task_config(&task.id, &dispatched.credential)
            .await
            .unwrap();
        assert_eq!(config["task"]["taskMethod"], "DEPLOY_SITE");

        let wrong_secret = WorkerCredential::new(dispatched.worker_name.clone(), "nope");
        assert!(matches!(
            dispatcher.pull_task_config(&task.id, &wrong_secret).await,
            Err(PipelineError::Unauthorized(_))
        ));
        assert!(matches!(
            dispatcher
                .pull_task_config("wt4site-deploy-site-other", &dispatched.credential)
                .await,
            Err(PipelineError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_reports_update_job_and_publish_errors() {
        let store = Arc::new(InMemoryPipelineStore::new());
        let events = EventPublisher::default();
        let mut receiver = events.subscribe();
        let dispatcher = TaskDispatcher::new(
            store.clone(),
            Arc::new(InMemoryJobQueue::new("jobs")),
            events,
        );
        let task = PipelineTask::new(TaskMethod::CreatePosts, 1, 11);
        store.create_task(&task).await.unwrap();
        let dispatched = dispatcher
            .dispatch_task(&task, TemplateType::Hexo, vec![], DomainConfig::new(), false)
            .await
            .unwrap();

        let health = WorkerReport {
            reason: ReportReason::HealthCheck,
            data: Value::Null,
            timestamp: 1_700_000_000_000,
        };
        dispatcher
            .report(&task.id, &dispatched.credential, &health)
            .await
            .unwrap();
        let job = store
            .get_worker_job(&dispatched.worker_name)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            job.last_health_check_at.unwrap().timestamp_millis(),
            1_700_000_000_000
        );

        let errored = WorkerReport {
            reason: ReportReason::Errored,
            data: Value::String("hexo generate failed".into()),
            timestamp: 1_700_000_000_500,
        };
        dispatcher
            .report(&task.id, &dispatched.credential, &errored)
            .await
            .unwrap();
        let event = receiver.recv().await.unwrap().event;
        assert_eq!(
            event,
            PipelineEvent::WorkerErrored {
                task_id: task.id.clone(),
                worker_name: dispatched.worker_name.clone(),
                reason: "hexo generate failed".into(),
            }
        );
    }

    #[test]
    fn test_report_body_format() {
        let report: WorkerReport = serde_json::from_str(
            r#"{"reason":"HEALTH_CHECK","data":{"step":"GIT_CLONE_CHECKOUT"},"timestamp":1}"#,
        )
        .unwrap();
        assert_eq!(report.reason, ReportReason::HealthCheck);
        assert_eq!(report.data["step"], "GIT_CLONE_CHECKOUT");
    }
}
