use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::{StateMachineError, StateMachineResult};
use super::events::TaskEvent;

/// Shared progress vocabulary for order flags and task lifecycles.
///
/// Orders carry three independent flags (`submit_state`, `publish_state`,
/// `certificate_state`) and every task carries one `state`; all of them move
/// strictly forward: `NONE -> PENDING -> DOING -> FINISHED | FAILED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderTaskState {
    /// Flag not in use for this order yet
    #[default]
    None,
    /// Waiting to be claimed or dispatched
    Pending,
    /// Claimed by a task that has been handed to a worker
    Doing,
    /// Completed successfully
    Finished,
    /// Completed with an error
    Failed,
}

impl OrderTaskState {
    pub const ALL: [OrderTaskState; 5] = [
        Self::None,
        Self::Pending,
        Self::Doing,
        Self::Finished,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Pending => "PENDING",
            Self::Doing => "DOING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
        }
    }

    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Check if this state is still open (holds a workspace when set on a task)
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Doing)
    }

    /// Position in the forward sequence; terminal states share the last rank
    pub fn rank(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Pending => 1,
            Self::Doing => 2,
            Self::Finished | Self::Failed => 3,
        }
    }

    /// Whether `next` is reachable from `self` in exactly one step
    pub fn can_transition_to(&self, next: OrderTaskState) -> bool {
        matches!(
            (self, next),
            (Self::None, Self::Pending)
                | (Self::Pending, Self::Doing)
                | (Self::Doing, Self::Finished)
                | (Self::Doing, Self::Failed)
        )
    }

    /// Apply an event, returning the target state
    pub fn transition(&self, event: &TaskEvent) -> StateMachineResult<OrderTaskState> {
        let target = match (self, event) {
            (Self::None, TaskEvent::Enqueue) => Self::Pending,
            (Self::Pending, TaskEvent::Dispatch) => Self::Doing,
            (Self::Doing, TaskEvent::Finish) => Self::Finished,
            (Self::Doing, TaskEvent::Fail(_)) => Self::Failed,
            (from, event) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };
        Ok(target)
    }
}

impl fmt::Display for OrderTaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderTaskState {
    type Err = StateMachineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(Self::None),
            "PENDING" => Ok(Self::Pending),
            "DOING" => Ok(Self::Doing),
            "FINISHED" => Ok(Self::Finished),
            "FAILED" => Ok(Self::Failed),
            _ => Err(StateMachineError::InvalidState(s.to_string())),
        }
    }
}
