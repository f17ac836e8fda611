//! Durable hand-off between the dispatcher and the job runner.
//!
//! Enqueue returns once the job is stored. The runner reads jobs one at a time
//! and archives each after the processor returns.

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::{PgPool, Row};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Notify;
use tracing::{debug, info};

use super::task_config::QueuedJob;
use crate::error::{PipelineError, Result};

/// A job read from the queue, with the id needed to acknowledge it
#[derive(Debug, Clone)]
pub struct ReceivedJob {
    pub message_id: i64,
    pub job: QueuedJob,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    fn queue_name(&self) -> &str;

    /// Store a job; returns its message id
    async fn enqueue(&self, job: &QueuedJob) -> Result<i64>;

    /// Next visible job, if any
    async fn dequeue(&self) -> Result<Option<ReceivedJob>>;

    /// Remove a processed job
    async fn ack(&self, message_id: i64) -> Result<()>;

    /// Resolves when a job may be available. Backends without push wakeups
    /// just sleep for `poll_interval`.
    async fn wait(&self, poll_interval: std::time::Duration) {
        tokio::time::sleep(poll_interval).await;
    }
}

/// Process-local FIFO queue
#[derive(Debug)]
pub struct InMemoryJobQueue {
    name: String,
    jobs: Mutex<VecDeque<ReceivedJob>>,
    next_id: AtomicI64,
    notify: Notify,
}

impl InMemoryJobQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            jobs: Mutex::new(VecDeque::new()),
            next_id: AtomicI64::new(1),
            notify: Notify::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    fn queue_name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, job: &QueuedJob) -> Result<i64> {
        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.jobs.lock().push_back(ReceivedJob {
            message_id,
            job: job.clone(),
        });
        self.notify.notify_one();
        debug!(queue = %self.name, message_id, "📤 Job enqueued");
        Ok(message_id)
    }

    async fn dequeue(&self) -> Result<Option<ReceivedJob>> {
        Ok(self.jobs.lock().pop_front())
    }

    async fn ack(&self, _message_id: i64) -> Result<()> {
        Ok(())
    }

    async fn wait(&self, poll_interval: std::time::Duration) {
        let _ = tokio::time::timeout(poll_interval, self.notify.notified()).await;
    }
}

/// Queue backed by the PostgreSQL `pgmq` extension
#[derive(Debug, Clone)]
pub struct PgmqJobQueue {
    pool: PgPool,
    name: String,
    visibility_timeout_seconds: i32,
}

impl PgmqJobQueue {
    pub fn new(pool: PgPool, name: impl Into<String>, visibility_timeout_seconds: i32) -> Self {
        Self {
            pool,
            name: name.into(),
            visibility_timeout_seconds,
        }
    }

    /// Create the queue if it does not exist
    pub async fn ensure_queue(&self) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(&self.name)
            .execute(&self.pool)
            .await
            .map_err(|e| PipelineError::queue(format!("Failed to create queue {}: {e}", self.name)))?;
        info!(queue = %self.name, "✅ pgmq queue ready");
        Ok(())
    }
}

#[async_trait]
impl JobQueue for PgmqJobQueue {
    fn queue_name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, job: &QueuedJob) -> Result<i64> {
        let payload = serde_json::to_value(job)?;
        let message_id: i64 = sqlx::query_scalar("SELECT * FROM pgmq.send($1, $2)")
            .bind(&self.name)
            .bind(payload)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| PipelineError::queue(format!("Failed to send to {}: {e}", self.name)))?;
        debug!(queue = %self.name, message_id, "📤 Job enqueued");
        Ok(message_id)
    }

    async fn dequeue(&self) -> Result<Option<ReceivedJob>> {
        let row = sqlx::query("SELECT msg_id, message FROM pgmq.read($1, $2, 1)")
            .bind(&self.name)
            .bind(self.visibility_timeout_seconds)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PipelineError::queue(format!("Failed to read {}: {e}", self.name)))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let message_id: i64 = row.try_get("msg_id")?;
        let message: serde_json::Value = row.try_get("message")?;
        let job: QueuedJob = serde_json::from_value(message)?;
        Ok(Some(ReceivedJob { message_id, job }))
    }

    async fn ack(&self, message_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.archive($1, $2)")
            .bind(&self.name)
            .bind(message_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                PipelineError::queue(format!("Failed to archive message {message_id}: {e}"))
            })?;
        Ok(())
    }
}
