use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::fmt;

use crate::models::TemplateType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerJobState {
    Queued,
    Running,
    Finished,
    Errored,
    /// Not executed because an earlier job of the same task failed
    Skipped,
}

impl WorkerJobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Errored => "ERRORED",
            Self::Skipped => "SKIPPED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Errored | Self::Skipped)
    }
}

impl fmt::Display for WorkerJobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkerJobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(Self::Queued),
            "RUNNING" => Ok(Self::Running),
            "FINISHED" => Ok(Self::Finished),
            "ERRORED" => Ok(Self::Errored),
            "SKIPPED" => Ok(Self::Skipped),
            _ => Err(format!("Invalid worker job state: {s}")),
        }
    }
}

impl_text_column!(WorkerJobState);

/// One queued job: the unit a worker pulls its configuration for.
///
/// `worker_name` is unique per job and doubles as the credential user name;
/// `worker_secret` is the capability token paired with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct WorkerJob {
    pub worker_name: String,
    pub task_id: String,
    #[serde(skip_serializing)]
    pub worker_secret: String,
    pub template: TemplateType,
    pub task_config: Value,
    pub is_last_task: bool,
    pub state: WorkerJobState,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
