use serde::{Deserialize, Serialize};

/// Events that move an order flag or a task forward
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TaskEvent {
    /// Order intake or batching (`NONE -> PENDING`)
    Enqueue,
    /// Task handed to the dispatcher (`PENDING -> DOING`)
    Dispatch,
    /// Worker reported completion (`DOING -> FINISHED`)
    Finish,
    /// Worker or dispatcher failure (`DOING -> FAILED`)
    Fail(String),
}

impl TaskEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Enqueue => "enqueue",
            Self::Dispatch => "dispatch",
            Self::Finish => "finish",
            Self::Fail(_) => "fail",
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }

    /// Check if this event represents a terminal transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish | Self::Fail(_))
    }

    /// Create a failure event with the given error message
    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }
}
