#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Metaspace Pipeline
//!
//! Publishing pipeline core for Metaspace sites: turns post and site intents
//! into batched tasks, runs them as chains of containerized worker jobs, and
//! keeps a signed provenance record of every published piece of content.
//!
//! ## Architecture
//!
//! Intents are persisted as **orders**. A coordinator batches the pending
//! orders of one site into a **task**, which holds the site's git workspace
//! exclusively until it finishes or fails. The dispatcher queues the task's
//! **worker jobs**; workers pull their config and report back over HTTP; job
//! outcomes travel the event bus back to the coordinators, which move orders,
//! tasks and site statuses forward.
//!
//! ## Module Organization
//!
//! - [`models`] - orders, tasks, site configs and worker jobs
//! - [`state_machine`] - the shared order/task state machine and task lifecycle
//! - [`store`] - persistence traits with PostgreSQL and in-memory backends
//! - [`dispatcher`] - step planning, job queue, worker protocol and job runner
//! - [`coordinator`] - post and site pipelines plus the event handler
//! - [`provenance`] - author digest, author signature and server verification
//! - [`storage`] - content-addressed metadata storage gateway
//! - [`providers`] - DNS, git and metadata storage backends and their registry
//! - [`events`] - broadcast bus of job outcomes
//! - [`web`] - worker callback endpoints and health probes
//! - [`config`] - layered configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use metaspace_pipeline::dispatcher::{InMemoryJobQueue, TaskDispatcher};
//! use metaspace_pipeline::events::EventPublisher;
//! use metaspace_pipeline::store::InMemoryPipelineStore;
//!
//! let store = Arc::new(InMemoryPipelineStore::new());
//! let queue = Arc::new(InMemoryJobQueue::new("pipeline_jobs"));
//! let dispatcher = TaskDispatcher::new(store, queue, EventPublisher::default());
//! ```

pub mod config;
pub mod constants;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod provenance;
pub mod providers;
pub mod state_machine;
pub mod storage;
pub mod store;
pub mod web;

pub use config::{ConfigManager, PipelineConfig};
pub use coordinator::{
    PipelineContext, PipelineEventHandler, PostPipelineCoordinator, SitePipelineCoordinator,
};
pub use dispatcher::{JobRunner, TaskDispatcher};
pub use error::{PipelineError, Result};
pub use events::{EventPublisher, PipelineEvent};
pub use models::{OrderTaskState, PipelineTask, PostOrder, TaskMethod};
pub use provenance::ProvenanceVerifier;
pub use providers::ProviderRegistry;
pub use storage::{MetadataStorageType, StorageGateway};
pub use store::{InMemoryPipelineStore, PgPipelineStore, PipelineStore};
