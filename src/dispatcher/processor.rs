//! Job execution backends and the single consumer that feeds them.

use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::queue::{JobQueue, ReceivedJob};
use super::task_dispatcher::{ReportReason, TaskDispatcher, WorkerCredential, WorkerReport};
use crate::config::{RunnerConfig, WorkerConfig};
use crate::constants::worker_env;
use crate::error::{PipelineError, Result};
use crate::events::{EventPublisher, PipelineEvent};
use crate::logging::log_worker_operation;
use crate::models::{WorkerJob, WorkerJobState};
use crate::store::PipelineStore;

/// Runs one worker job to completion
#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok` when the worker exited successfully
    async fn process(&self, job: &WorkerJob) -> Result<()>;
}

/// One container per job; the worker pulls its config with the injected
/// credential and reports back over HTTP.
#[derive(Debug, Clone)]
pub struct DockerProcessor {
    config: WorkerConfig,
}

impl DockerProcessor {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    fn run_args(&self, job: &WorkerJob) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--name".to_string(),
            job.worker_name.clone(),
        ];
        if let Some(network) = &self.config.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }
        for (key, value) in [
            (worker_env::TASK_ID, job.task_id.as_str()),
            (worker_env::WORKER_NAME, job.worker_name.as_str()),
            (worker_env::WORKER_SECRET, job.worker_secret.as_str()),
            (worker_env::BACKEND_URL, self.config.backend_url.as_str()),
        ] {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(self.config.image.clone());
        args
    }

    async fn remove_container(&self, name: &str) {
        match Command::new(&self.config.docker_binary)
            .args(["rm", "-f", name])
            .output()
            .await
        {
            Ok(output) if output.status.success() => debug!(container = name, "🧹 Container removed"),
            Ok(output) => warn!(
                container = name,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "Failed to remove container"
            ),
            Err(e) => warn!(container = name, error = %e, "Failed to remove container"),
        }
    }
}

#[async_trait]
impl Processor for DockerProcessor {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn process(&self, job: &WorkerJob) -> Result<()> {
        info!(worker_name = %job.worker_name, task_id = %job.task_id, image = %self.config.image, "🐳 Starting worker container");
        let status = Command::new(&self.config.docker_binary)
            .args(self.run_args(job))
            .status()
            .await;

        self.remove_container(&job.worker_name).await;

        let status = status.map_err(|e| {
            PipelineError::worker_execution(format!("Failed to start worker container: {e}"))
        })?;
        if !status.success() {
            return Err(PipelineError::worker_execution(format!(
                "Worker container {} exited with {}",
                job.worker_name,
                status
                    .code()
                    .map_or_else(|| "signal".to_string(), |code| code.to_string())
            )));
        }
        Ok(())
    }
}

/// Simulated worker: pulls its config, sends health checks, and fails at a
/// configurable rate.
#[derive(Debug, Clone)]
pub struct MockProcessor {
    dispatcher: TaskDispatcher,
    failure_rate: f64,
    health_checks: u32,
    step_delay: Duration,
}

impl MockProcessor {
    pub fn new(dispatcher: TaskDispatcher, config: &RunnerConfig) -> Self {
        Self {
            dispatcher,
            failure_rate: config.mock_failure_rate.clamp(0.0, 1.0),
            health_checks: config.mock_health_checks,
            step_delay: Duration::from_millis(config.mock_step_delay_ms),
        }
    }
}

#[async_trait]
impl Processor for MockProcessor {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn process(&self, job: &WorkerJob) -> Result<()> {
        let credential = WorkerCredential::new(job.worker_name.clone(), job.worker_secret.clone());
        let config = self
            .dispatcher
            .pull_task_config(&job.task_id, &credential)
            .await?;
        let steps = config["task"]["taskSteps"]
            .as_array()
            .map_or(0, |steps| steps.len());
        debug!(worker_name = %job.worker_name, steps, "Mock worker pulled config");

        for check in 0..self.health_checks {
            tokio::time::sleep(self.step_delay).await;
            let report = WorkerReport {
                reason: ReportReason::HealthCheck,
                data: serde_json::json!({ "check": check, "steps": steps }),
                timestamp: chrono::Utc::now().timestamp_millis(),
            };
            self.dispatcher
                .report(&job.task_id, &credential, &report)
                .await?;
        }

        let fail = rand::thread_rng().gen_bool(self.failure_rate);
        if fail {
            return Err(PipelineError::worker_execution(format!(
                "Mock worker {} failed",
                job.worker_name
            )));
        }
        Ok(())
    }
}

/// Single FIFO consumer of the job queue.
///
/// Jobs of a task run in enqueue order. Once a job fails, the task's
/// remaining queued jobs are skipped.
#[derive(Clone)]
pub struct JobRunner {
    store: Arc<dyn PipelineStore>,
    queue: Arc<dyn JobQueue>,
    processor: Arc<dyn Processor>,
    events: EventPublisher,
    poll_interval: Duration,
    shutdown_notify: Arc<Notify>,
    stopped: Arc<AtomicBool>,
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner")
            .field("queue", &self.queue.queue_name())
            .field("processor", &self.processor.name())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        queue: Arc<dyn JobQueue>,
        processor: Arc<dyn Processor>,
        events: EventPublisher,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            processor,
            events,
            poll_interval,
            shutdown_notify: Arc::new(Notify::new()),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the consume loop on the runtime
    pub fn spawn(&self) -> JoinHandle<()> {
        let runner = self.clone();
        tokio::spawn(async move {
            info!(queue = runner.queue.queue_name(), processor = runner.processor.name(), "🔄 Job runner started");
            while !runner.stopped.load(Ordering::SeqCst) {
                match runner.run_once().await {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(e) => error!(error = %e, "Job runner cycle failed"),
                }
                tokio::select! {
                    _ = runner.queue.wait(runner.poll_interval) => {}
                    _ = runner.shutdown_notify.notified() => {}
                }
            }
            info!("Job runner shutting down");
        })
    }

    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.shutdown_notify.notify_waiters();
    }

    /// Process the next queued job. Returns `false` when the queue was empty.
    pub async fn run_once(&self) -> Result<bool> {
        let Some(received) = self.queue.dequeue().await? else {
            return Ok(false);
        };
        let outcome = self.handle(&received).await;
        if let Err(e) = &outcome {
            // the outcome event may be missing
            error!(
                worker_name = %received.job.worker_name,
                task_id = received.job.task_id(),
                error = %e,
                "Job handling failed"
            );
            self.events.publish(PipelineEvent::JobFailed {
                task_id: received.job.task_id().to_string(),
                worker_name: received.job.worker_name.clone(),
                reason: format!("Job runner error: {e}"),
            });
        }
        self.queue.ack(received.message_id).await?;
        outcome.map(|()| true)
    }

    async fn handle(&self, received: &ReceivedJob) -> Result<()> {
        let worker_name = &received.job.worker_name;
        let task_id = received.job.task_id();

        let Some(job) = self.store.get_worker_job(worker_name).await? else {
            error!(worker_name = %worker_name, task_id, "Queued job has no worker record, dropping");
            return Ok(());
        };

        if job.state != WorkerJobState::Queued {
            debug!(worker_name = %worker_name, task_id, state = %job.state, "Job no longer queued, left as is");
            return Ok(());
        }

        let task_open = self
            .store
            .get_task(task_id)
            .await?
            .is_some_and(|task| task.state.is_open());
        let sibling_errored = self
            .store
            .list_worker_jobs(task_id)
            .await?
            .iter()
            .any(|other| other.state == WorkerJobState::Errored);
        if !task_open || sibling_errored {
            self.store
                .update_worker_job_state(worker_name, WorkerJobState::Skipped)
                .await?;
            log_worker_operation("run", worker_name, task_id, "skipped", None);
            return Ok(());
        }

        self.store
            .update_worker_job_state(worker_name, WorkerJobState::Running)
            .await?;
        log_worker_operation("run", worker_name, task_id, "running", Some(self.processor.name()));

        match self.processor.process(&job).await {
            Ok(()) => {
                let errored_meanwhile = self
                    .store
                    .get_worker_job(worker_name)
                    .await?
                    .is_some_and(|current| current.state == WorkerJobState::Errored);
                if errored_meanwhile {
                    // the report endpoint already raised WorkerErrored
                    self.skip_remaining_jobs(task_id).await?;
                    return Ok(());
                }
                self.store
                    .update_worker_job_state(worker_name, WorkerJobState::Finished)
                    .await?;
                log_worker_operation("run", worker_name, task_id, "finished", None);
                self.events.publish(PipelineEvent::JobSucceeded {
                    task_id: task_id.to_string(),
                    worker_name: worker_name.clone(),
                    is_last_task: job.is_last_task,
                });
            }
            Err(e) => {
                self.store
                    .update_worker_job_state(worker_name, WorkerJobState::Errored)
                    .await?;
                self.skip_remaining_jobs(task_id).await?;
                log_worker_operation("run", worker_name, task_id, "errored", Some(&e.to_string()));
                self.events.publish(PipelineEvent::JobFailed {
                    task_id: task_id.to_string(),
                    worker_name: worker_name.clone(),
                    reason: e.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn skip_remaining_jobs(&self, task_id: &str) -> Result<()> {
        for pending in self
            .store
            .list_worker_jobs(task_id)
            .await?
            .into_iter()
            .filter(|job| job.state == WorkerJobState::Queued)
        {
            self.store
                .update_worker_job_state(&pending.worker_name, WorkerJobState::Skipped)
                .await?;
        }
        Ok(())
    }
}
