//! Pipeline event bus: job outcomes flow from the runner and the worker report
//! endpoint to the coordinators' event loop.

pub mod publisher;

pub use publisher::{EventPublisher, PipelineEvent, PublishedEvent};
