use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::steps::TaskStep;
use crate::error::Result;
use crate::models::{TaskMethod, TemplateType};

/// Identity of the job inside its task config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDescriptor {
    pub task_id: String,
    pub task_method: TaskMethod,
    pub task_steps: Vec<TaskStep>,
    /// The worker may tear down its workspace after this job
    pub is_last_task: bool,
}

/// Domain configuration handed to the worker: git credentials, site metadata,
/// posts. Keys are flattened next to `task` in the pulled config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainConfig(Map<String, Value>);

impl DomainConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: Serialize>(mut self, key: &str, value: &T) -> Result<Self> {
        self.0.insert(key.to_string(), serde_json::to_value(value)?);
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

/// Fully resolved config a worker pulls with its credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerTaskConfig {
    #[serde(flatten)]
    pub domain: DomainConfig,
    pub task: TaskDescriptor,
}

/// Queue message, one per job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedJob {
    pub worker_name: String,
    pub template: TemplateType,
    pub task_config: WorkerTaskConfig,
}

impl QueuedJob {
    pub fn task_id(&self) -> &str {
        &self.task_config.task.task_id
    }

    pub fn is_last_task(&self) -> bool {
        self.task_config.task.is_last_task
    }
}
