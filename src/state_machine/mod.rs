//! # Order/Task State Machine
//!
//! Shared `NONE -> PENDING -> DOING -> FINISHED | FAILED` vocabulary for order
//! flags and tasks, and the [`TaskLifecycle`] that moves a task and cascades the
//! new state to the orders it owns.

pub mod errors;
pub mod events;
pub mod states;
pub mod task_lifecycle;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::TaskEvent;
pub use states::OrderTaskState;
pub use task_lifecycle::TaskLifecycle;
