//! # Order and Task Stores
//!
//! Persistence boundary of the pipeline. Orders, tasks, worker jobs and server
//! verifications are stored behind one trait per aggregate so coordinators and
//! the dispatcher can run against PostgreSQL in production and the in-memory
//! store in tests.
//!
//! Every bulk state cascade is predicate guarded: the `from` state (and the
//! owning task id) are part of the update condition, so two concurrent callers
//! can never move the same order twice. Returned counts tell the caller how
//! many rows actually moved.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    DeploySiteOrder, OrderTaskState, PageRequest, Pagination, PipelineTask, PostAction,
    PostMetadata, PostOrder, PublishSiteOrder, ServerVerificationEntity, TaskWorkspace, WorkerJob,
    WorkerJobState,
};
use crate::storage::MetadataStorageType;

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryPipelineStore;
pub use postgres::PgPipelineStore;

/// Post snapshots and post orders
#[async_trait]
pub trait PostOrderStore: Send + Sync {
    /// Insert a snapshot; replaying the same id is a no-op
    async fn save_post_metadata(&self, metadata: &PostMetadata) -> Result<()>;

    async fn get_post_metadata(&self, id: &str) -> Result<Option<PostMetadata>>;

    /// Insert an order; replaying the same id is a no-op
    async fn save_post_order(&self, order: &PostOrder) -> Result<()>;

    async fn get_post_order(&self, id: &str) -> Result<Option<PostOrder>>;

    /// Orders claimed by a post task, oldest first
    async fn list_post_orders_for_task(&self, post_task_id: &str) -> Result<Vec<PostOrder>>;

    /// Newest-first page of a user's post orders, optionally narrowed to one site
    async fn page_post_orders(
        &self,
        user_id: i64,
        site_config_id: Option<i64>,
        page: PageRequest,
    ) -> Result<Pagination<PostOrder>>;

    /// Orders waiting to be batched for one site and action
    async fn count_pending_post_orders(
        &self,
        user_id: i64,
        site_config_id: i64,
        action: PostAction,
    ) -> Result<u64>;

    /// Stamp `post_task_id` on every unclaimed PENDING order of the site and
    /// action. This is the only write path that takes an order out of the
    /// claimable pool.
    async fn claim_pending_post_orders(
        &self,
        user_id: i64,
        site_config_id: i64,
        action: PostAction,
        post_task_id: &str,
    ) -> Result<Vec<PostOrder>>;

    async fn update_post_orders_submit_state(
        &self,
        post_task_id: &str,
        from: OrderTaskState,
        to: OrderTaskState,
    ) -> Result<u64>;

    /// Finish the submit flag of a post task's orders and queue them for the
    /// given publish site order (`publish_state: NONE -> PENDING`).
    async fn finish_post_orders_for_publish(
        &self,
        post_task_id: &str,
        publish_site_order_id: &str,
    ) -> Result<u64>;

    /// Stamp `publish_site_task_id` on every unclaimed publish-PENDING order of
    /// the site.
    async fn claim_post_orders_for_publish(
        &self,
        user_id: i64,
        site_config_id: i64,
        publish_site_order_id: &str,
        publish_site_task_id: &str,
    ) -> Result<u64>;

    async fn update_post_orders_publish_state(
        &self,
        publish_site_task_id: &str,
        from: OrderTaskState,
        to: OrderTaskState,
    ) -> Result<u64>;

    /// Move the certificate flag of one order, optionally recording the
    /// notarization reference. Returns whether the order was in `from`.
    async fn update_post_order_certificate(
        &self,
        id: &str,
        from: OrderTaskState,
        to: OrderTaskState,
        certificate: Option<(String, MetadataStorageType)>,
    ) -> Result<bool>;
}

/// Deploy and publish site orders
#[async_trait]
pub trait SiteOrderStore: Send + Sync {
    async fn save_deploy_site_order(&self, order: &DeploySiteOrder) -> Result<()>;

    async fn get_deploy_site_order(&self, id: &str) -> Result<Option<DeploySiteOrder>>;

    /// Attach a PENDING, unlinked deploy order to a task
    async fn link_deploy_site_order(&self, id: &str, deploy_site_task_id: &str) -> Result<bool>;

    async fn update_deploy_site_orders_state(
        &self,
        deploy_site_task_id: &str,
        from: OrderTaskState,
        to: OrderTaskState,
    ) -> Result<u64>;

    async fn save_publish_site_order(&self, order: &PublishSiteOrder) -> Result<()>;

    async fn get_publish_site_order(&self, id: &str) -> Result<Option<PublishSiteOrder>>;

    /// Oldest PENDING publish order of the site not yet attached to a task
    async fn find_pending_publish_site_order(
        &self,
        site_config_id: i64,
    ) -> Result<Option<PublishSiteOrder>>;

    /// Attach a PENDING, unlinked publish order to a task
    async fn link_publish_site_order(&self, id: &str, publish_site_task_id: &str)
        -> Result<bool>;

    async fn update_publish_site_orders_state(
        &self,
        publish_site_task_id: &str,
        from: OrderTaskState,
        to: OrderTaskState,
    ) -> Result<u64>;
}

/// Batch tasks and the per-site workspace lock
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a task while acquiring the workspace of its site config.
    ///
    /// Fails with `WorkspaceLocked` when another task of the same site is
    /// still PENDING or DOING. Check and insert happen atomically.
    async fn create_task(&self, task: &PipelineTask) -> Result<TaskWorkspace>;

    async fn get_task(&self, id: &str) -> Result<Option<PipelineTask>>;

    /// The non-terminal task holding the site's workspace, if any
    async fn find_active_site_task(&self, site_config_id: i64) -> Result<Option<PipelineTask>>;

    /// Conditional state update; `false` when the task was not in `from`
    async fn transition_task_state(
        &self,
        id: &str,
        from: OrderTaskState,
        to: OrderTaskState,
    ) -> Result<bool>;

    async fn assign_task_worker(&self, id: &str, worker_name: &str, worker_secret: &str)
        -> Result<()>;
}

/// Write-once server verification payloads
#[async_trait]
pub trait VerificationStore: Send + Sync {
    /// Returns `false` when an entity with the same id already existed
    async fn save_server_verification(&self, entity: &ServerVerificationEntity) -> Result<bool>;

    async fn get_server_verification(&self, id: &str)
        -> Result<Option<ServerVerificationEntity>>;
}

/// Queued worker jobs, the lookup target of the worker protocol
#[async_trait]
pub trait WorkerJobStore: Send + Sync {
    async fn save_worker_job(&self, job: &WorkerJob) -> Result<()>;

    async fn get_worker_job(&self, worker_name: &str) -> Result<Option<WorkerJob>>;

    async fn update_worker_job_state(&self, worker_name: &str, state: WorkerJobState)
        -> Result<bool>;

    async fn record_worker_health_check(
        &self,
        worker_name: &str,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Jobs of a task in creation order
    async fn list_worker_jobs(&self, task_id: &str) -> Result<Vec<WorkerJob>>;
}

/// Everything the pipeline persists
pub trait PipelineStore:
    PostOrderStore + SiteOrderStore + TaskStore + VerificationStore + WorkerJobStore
{
}

impl<T> PipelineStore for T where
    T: PostOrderStore + SiteOrderStore + TaskStore + VerificationStore + WorkerJobStore
{
}
