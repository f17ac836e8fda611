use thiserror::Error;

use crate::state_machine::errors::StateMachineError;

/// Crate-wide error type.
///
/// Callers (the pipeline coordinators and the web layer) branch on the variant:
/// verification failures, missing configuration and worker failures each need a
/// different reaction, so they are never collapsed into a single string error.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Data not found: {0}")]
    DataNotFound(String),

    #[error("Workspace for site config {site_config_id} is held by task {task_id}")]
    WorkspaceLocked {
        site_config_id: i64,
        task_id: String,
    },

    #[error("Unauthorized worker: {0}")]
    Unauthorized(String),

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateMachineError),

    #[error("Worker execution error: {0}")]
    WorkerExecution(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::DataNotFound(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn worker_execution(message: impl Into<String>) -> Self {
        Self::WorkerExecution(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue(message.into())
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Verification and registry lookup failures surface as 400-class errors.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Failures that came from the worker side of the pipeline, synchronous or not.
    pub fn is_worker_failure(&self) -> bool {
        matches!(self, Self::WorkerExecution(_) | Self::Queue(_))
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        Self::Provider(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::validation("Invalid dns type");
        assert_eq!(err.to_string(), "Validation error: Invalid dns type");

        let err = PipelineError::WorkspaceLocked {
            site_config_id: 7,
            task_id: "wt4site-deploy-site-abc".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Workspace for site config 7 is held by task wt4site-deploy-site-abc"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(PipelineError::validation("x").is_validation());
        assert!(!PipelineError::not_found("x").is_validation());
        assert!(PipelineError::worker_execution("exit 1").is_worker_failure());
        assert!(PipelineError::queue("rejected").is_worker_failure());
        assert!(!PipelineError::storage("down").is_worker_failure());
    }
}
