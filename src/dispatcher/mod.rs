//! # Task Dispatcher
//!
//! Turns a task into queued worker jobs and serves the worker pull/report
//! protocol.
//!
//! * [`steps`] picks the primitive step list for a job
//! * [`task_dispatcher`] persists the job, issues the worker credential and
//!   enqueues the payload
//! * [`queue`] is the durable hand-off (in-memory or pgmq)
//! * [`processor`] executes jobs (Docker container or mock) from a single
//!   FIFO [`JobRunner`]

pub mod processor;
pub mod queue;
pub mod steps;
pub mod task_config;
pub mod task_dispatcher;

pub use processor::{DockerProcessor, JobRunner, MockProcessor, Processor};
pub use queue::{InMemoryJobQueue, JobQueue, PgmqJobQueue, ReceivedJob};
pub use steps::{StepPlanner, TaskStep};
pub use task_config::{DomainConfig, QueuedJob, TaskDescriptor, WorkerTaskConfig};
pub use task_dispatcher::{
    DispatchedJob, ReportReason, TaskDispatcher, WorkerCredential, WorkerReport,
};
