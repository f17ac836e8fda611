use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::constants::{events, system};

/// Lifecycle events raised by the job runner and the worker report endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A worker job exited successfully
    JobSucceeded {
        task_id: String,
        worker_name: String,
        is_last_task: bool,
    },
    /// A worker job exited with an error or could not be started
    JobFailed {
        task_id: String,
        worker_name: String,
        reason: String,
    },
    /// The worker itself reported `ERRORED` through the report endpoint
    WorkerErrored {
        task_id: String,
        worker_name: String,
        reason: String,
    },
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::JobSucceeded { .. } => events::JOB_SUCCEEDED,
            Self::JobFailed { .. } => events::JOB_FAILED,
            Self::WorkerErrored { .. } => events::WORKER_ERRORED,
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            Self::JobSucceeded { task_id, .. }
            | Self::JobFailed { task_id, .. }
            | Self::WorkerErrored { task_id, .. } => task_id,
        }
    }
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub event: PipelineEvent,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

/// Broadcast bus for pipeline lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: PipelineEvent) {
        tracing::debug!(event = event.name(), task_id = event.task_id(), "📣 Publishing event");
        let published = PublishedEvent {
            event,
            published_at: chrono::Utc::now(),
        };
        if self.sender.send(published).is_err() {
            tracing::trace!("No event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(system::DEFAULT_EVENT_CAPACITY)
    }
}
