//! # PostgreSQL Pipeline Store
//!
//! SQLx implementation of the store traits. Claims and cascades are single
//! `UPDATE ... WHERE <current state>` statements; the workspace lock is a
//! transaction-scoped advisory lock on the site config id followed by the
//! "no open task" check and the insert.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info};

use super::{PostOrderStore, SiteOrderStore, TaskStore, VerificationStore, WorkerJobStore};
use crate::error::{PipelineError, Result};
use crate::models::{
    DeploySiteOrder, OrderTaskState, PageRequest, Pagination, PipelineTask, PostAction,
    PostMetadata, PostOrder, PublishSiteOrder, ServerVerificationEntity, TaskWorkspace, WorkerJob,
    WorkerJobState,
};
use crate::storage::MetadataStorageType;

const POST_ORDER_COLUMNS: &str = "id, user_id, site_config_id, action, submit_state, \
    publish_state, certificate_state, server_verification_id, certificate_id, \
    certificate_storage_type, post_task_id, publish_site_order_id, publish_site_task_id, \
    created_at, updated_at";

const TASK_COLUMNS: &str = "id, method, user_id, site_config_id, state, worker_name, \
    worker_secret, created_at, updated_at";

const WORKER_JOB_COLUMNS: &str = "worker_name, task_id, worker_secret, template, task_config, \
    is_last_task, state, last_health_check_at, created_at, updated_at";

/// Pipeline store backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PgPipelineStore {
    pool: PgPool,
}

impl PgPipelineStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| PipelineError::Database(e.into()))?;
        info!("✅ Pipeline schema migrations applied");
        Ok(())
    }
}

#[async_trait]
impl PostOrderStore for PgPipelineStore {
    async fn save_post_metadata(&self, metadata: &PostMetadata) -> Result<()> {
        sqlx::query(
            "INSERT INTO post_metadata \
                (id, user_id, title, content, summary, cover, categories, tags, license, \
                 is_draft, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(&metadata.id)
        .bind(metadata.user_id)
        .bind(&metadata.content.title)
        .bind(&metadata.content.content)
        .bind(&metadata.content.summary)
        .bind(&metadata.content.cover)
        .bind(&metadata.content.categories)
        .bind(&metadata.content.tags)
        .bind(&metadata.content.license)
        .bind(metadata.is_draft)
        .bind(metadata.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_post_metadata(&self, id: &str) -> Result<Option<PostMetadata>> {
        let metadata = sqlx::query_as::<_, PostMetadata>(
            "SELECT id, user_id, title, content, summary, cover, categories, tags, license, \
                    is_draft, created_at \
             FROM post_metadata WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(metadata)
    }

    async fn save_post_order(&self, order: &PostOrder) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO post_orders ({POST_ORDER_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             ON CONFLICT (id) DO NOTHING"
        ))
        .bind(&order.id)
        .bind(order.user_id)
        .bind(order.site_config_id)
        .bind(order.action)
        .bind(order.submit_state)
        .bind(order.publish_state)
        .bind(order.certificate_state)
        .bind(&order.server_verification_id)
        .bind(&order.certificate_id)
        .bind(order.certificate_storage_type)
        .bind(&order.post_task_id)
        .bind(&order.publish_site_order_id)
        .bind(&order.publish_site_task_id)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_post_order(&self, id: &str) -> Result<Option<PostOrder>> {
        let order = sqlx::query_as::<_, PostOrder>(&format!(
            "SELECT {POST_ORDER_COLUMNS} FROM post_orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(order)
    }

    async fn list_post_orders_for_task(&self, post_task_id: &str) -> Result<Vec<PostOrder>> {
        let orders = sqlx::query_as::<_, PostOrder>(&format!(
            "SELECT {POST_ORDER_COLUMNS} FROM post_orders WHERE post_task_id = $1 \
             ORDER BY created_at, id"
        ))
        .bind(post_task_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(orders)
    }

    async fn page_post_orders(
        &self,
        user_id: i64,
        site_config_id: Option<i64>,
        page: PageRequest,
    ) -> Result<Pagination<PostOrder>> {
        let page = page.normalized();
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM post_orders \
             WHERE user_id = $1 AND ($2::BIGINT IS NULL OR site_config_id = $2)",
        )
        .bind(user_id)
        .bind(site_config_id)
        .fetch_one(&self.pool)
        .await?;

        let items = sqlx::query_as::<_, PostOrder>(&format!(
            "SELECT {POST_ORDER_COLUMNS} FROM post_orders \
             WHERE user_id = $1 AND ($2::BIGINT IS NULL OR site_config_id = $2) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $3 OFFSET $4"
        ))
        .bind(user_id)
        .bind(site_config_id)
        .bind(i64::from(page.limit))
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(Pagination::new(items, total.max(0) as u64, page))
    }

    async fn count_pending_post_orders(
        &self,
        user_id: i64,
        site_config_id: i64,
        action: PostAction,
    ) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM post_orders \
             WHERE user_id = $1 AND site_config_id = $2 AND action = $3 \
               AND submit_state = 'PENDING' AND post_task_id = ''",
        )
        .bind(user_id)
        .bind(site_config_id)
        .bind(action)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn claim_pending_post_orders(
        &self,
        user_id: i64,
        site_config_id: i64,
        action: PostAction,
        post_task_id: &str,
    ) -> Result<Vec<PostOrder>> {
        let claimed = sqlx::query_as::<_, PostOrder>(&format!(
            "UPDATE post_orders SET post_task_id = $4, updated_at = NOW() \
             WHERE user_id = $1 AND site_config_id = $2 AND action = $3 \
               AND submit_state = 'PENDING' AND post_task_id = '' \
             RETURNING {POST_ORDER_COLUMNS}"
        ))
        .bind(user_id)
        .bind(site_config_id)
        .bind(action)
        .bind(post_task_id)
        .fetch_all(&self.pool)
        .await?;
        debug!(post_task_id, claimed = claimed.len(), "Claimed pending post orders");
        Ok(claimed)
    }

    async fn update_post_orders_submit_state(
        &self,
        post_task_id: &str,
        from: OrderTaskState,
        to: OrderTaskState,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE post_orders SET submit_state = $3, updated_at = NOW() \
             WHERE post_task_id = $1 AND submit_state = $2",
        )
        .bind(post_task_id)
        .bind(from)
        .bind(to)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn finish_post_orders_for_publish(
        &self,
        post_task_id: &str,
        publish_site_order_id: &str,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE post_orders SET \
                submit_state = 'FINISHED', \
                publish_state = CASE WHEN publish_state = 'NONE' THEN 'PENDING' \
                                     ELSE publish_state END, \
                publish_site_order_id = CASE WHEN publish_state = 'NONE' THEN $2 \
                                             ELSE publish_site_order_id END, \
                updated_at = NOW() \
             WHERE post_task_id = $1 AND submit_state = 'DOING'",
        )
        .bind(post_task_id)
        .bind(publish_site_order_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn claim_post_orders_for_publish(
        &self,
        user_id: i64,
        site_config_id: i64,
        publish_site_order_id: &str,
        publish_site_task_id: &str,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE post_orders SET publish_site_order_id = $3, publish_site_task_id = $4, \
                    updated_at = NOW() \
             WHERE user_id = $1 AND site_config_id = $2 \
               AND publish_state = 'PENDING' AND publish_site_task_id = ''",
        )
        .bind(user_id)
        .bind(site_config_id)
        .bind(publish_site_order_id)
        .bind(publish_site_task_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_post_orders_publish_state(
        &self,
        publish_site_task_id: &str,
        from: OrderTaskState,
        to: OrderTaskState,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE post_orders SET publish_state = $3, updated_at = NOW() \
             WHERE publish_site_task_id = $1 AND publish_state = $2",
        )
        .bind(publish_site_task_id)
        .bind(from)
        .bind(to)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_post_order_certificate(
        &self,
        id: &str,
        from: OrderTaskState,
        to: OrderTaskState,
        certificate: Option<(String, MetadataStorageType)>,
    ) -> Result<bool> {
        let (certificate_id, storage_type) = certificate.unzip();
        let result = sqlx::query(
            "UPDATE post_orders SET certificate_state = $3, \
                    certificate_id = COALESCE($4, certificate_id), \
                    certificate_storage_type = COALESCE($5, certificate_storage_type), \
                    updated_at = NOW() \
             WHERE id = $1 AND certificate_state = $2",
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(certificate_id)
        .bind(storage_type)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl SiteOrderStore for PgPipelineStore {
    async fn save_deploy_site_order(&self, order: &DeploySiteOrder) -> Result<()> {
        sqlx::query(
            "INSERT INTO deploy_site_orders \
                (id, user_id, site_config_id, submit_state, deploy_site_task_id, \
                 server_verification_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(&order.id)
        .bind(order.user_id)
        .bind(order.site_config_id)
        .bind(order.submit_state)
        .bind(&order.deploy_site_task_id)
        .bind(&order.server_verification_id)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_deploy_site_order(&self, id: &str) -> Result<Option<DeploySiteOrder>> {
        let order = sqlx::query_as::<_, DeploySiteOrder>(
            "SELECT id, user_id, site_config_id, submit_state, deploy_site_task_id, \
                    server_verification_id, created_at, updated_at \
             FROM deploy_site_orders WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(order)
    }

    async fn link_deploy_site_order(&self, id: &str, deploy_site_task_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE deploy_site_orders SET deploy_site_task_id = $2, updated_at = NOW() \
             WHERE id = $1 AND submit_state = 'PENDING' AND deploy_site_task_id = ''",
        )
        .bind(id)
        .bind(deploy_site_task_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_deploy_site_orders_state(
        &self,
        deploy_site_task_id: &str,
        from: OrderTaskState,
        to: OrderTaskState,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE deploy_site_orders SET submit_state = $3, updated_at = NOW() \
             WHERE deploy_site_task_id = $1 AND submit_state = $2",
        )
        .bind(deploy_site_task_id)
        .bind(from)
        .bind(to)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn save_publish_site_order(&self, order: &PublishSiteOrder) -> Result<()> {
        sqlx::query(
            "INSERT INTO publish_site_orders \
                (id, user_id, site_config_id, submit_state, publish_site_task_id, \
                 server_verification_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(&order.id)
        .bind(order.user_id)
        .bind(order.site_config_id)
        .bind(order.submit_state)
        .bind(&order.publish_site_task_id)
        .bind(&order.server_verification_id)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_publish_site_order(&self, id: &str) -> Result<Option<PublishSiteOrder>> {
        let order = sqlx::query_as::<_, PublishSiteOrder>(
            "SELECT id, user_id, site_config_id, submit_state, publish_site_task_id, \
                    server_verification_id, created_at, updated_at \
             FROM publish_site_orders WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(order)
    }

    async fn find_pending_publish_site_order(
        &self,
        site_config_id: i64,
    ) -> Result<Option<PublishSiteOrder>> {
        let order = sqlx::query_as::<_, PublishSiteOrder>(
            "SELECT id, user_id, site_config_id, submit_state, publish_site_task_id, \
                    server_verification_id, created_at, updated_at \
             FROM publish_site_orders \
             WHERE site_config_id = $1 AND submit_state = 'PENDING' AND publish_site_task_id = '' \
             ORDER BY created_at LIMIT 1",
        )
        .bind(site_config_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(order)
    }

    async fn link_publish_site_order(
        &self,
        id: &str,
        publish_site_task_id: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE publish_site_orders SET publish_site_task_id = $2, updated_at = NOW() \
             WHERE id = $1 AND submit_state = 'PENDING' AND publish_site_task_id = ''",
        )
        .bind(id)
        .bind(publish_site_task_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_publish_site_orders_state(
        &self,
        publish_site_task_id: &str,
        from: OrderTaskState,
        to: OrderTaskState,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE publish_site_orders SET submit_state = $3, updated_at = NOW() \
             WHERE publish_site_task_id = $1 AND submit_state = $2",
        )
        .bind(publish_site_task_id)
        .bind(from)
        .bind(to)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TaskStore for PgPipelineStore {
    async fn create_task(&self, task: &PipelineTask) -> Result<TaskWorkspace> {
        let mut tx = self.pool.begin().await?;

        // Serializes check-and-insert per site config until commit
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(task.site_config_id)
            .execute(&mut *tx)
            .await?;

        let holder: Option<String> = sqlx::query_scalar(
            "SELECT id FROM pipeline_tasks \
             WHERE site_config_id = $1 AND state IN ('PENDING', 'DOING') \
             LIMIT 1",
        )
        .bind(task.site_config_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(task_id) = holder {
            return Err(PipelineError::WorkspaceLocked {
                site_config_id: task.site_config_id,
                task_id,
            });
        }

        sqlx::query(&format!(
            "INSERT INTO pipeline_tasks ({TASK_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(&task.id)
        .bind(task.method)
        .bind(task.user_id)
        .bind(task.site_config_id)
        .bind(task.state)
        .bind(&task.worker_name)
        .bind(&task.worker_secret)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(TaskWorkspace::new(task.user_id, task.site_config_id, &task.id))
    }

    async fn get_task(&self, id: &str) -> Result<Option<PipelineTask>> {
        let task = sqlx::query_as::<_, PipelineTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM pipeline_tasks WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(task)
    }

    async fn find_active_site_task(&self, site_config_id: i64) -> Result<Option<PipelineTask>> {
        let task = sqlx::query_as::<_, PipelineTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM pipeline_tasks \
             WHERE site_config_id = $1 AND state IN ('PENDING', 'DOING') \
             ORDER BY created_at LIMIT 1"
        ))
        .bind(site_config_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(task)
    }

    async fn transition_task_state(
        &self,
        id: &str,
        from: OrderTaskState,
        to: OrderTaskState,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE pipeline_tasks SET state = $3, updated_at = NOW() \
             WHERE id = $1 AND state = $2",
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn assign_task_worker(
        &self,
        id: &str,
        worker_name: &str,
        worker_secret: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE pipeline_tasks SET worker_name = $2, worker_secret = $3, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(worker_name)
        .bind(worker_secret)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(PipelineError::not_found(format!("Task {id} not found")));
        }
        Ok(())
    }
}

#[async_trait]
impl VerificationStore for PgPipelineStore {
    async fn save_server_verification(&self, entity: &ServerVerificationEntity) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO server_verifications (id, payload, created_at) \
             VALUES ($1, $2, $3) ON CONFLICT (id) DO NOTHING",
        )
        .bind(&entity.id)
        .bind(&entity.payload)
        .bind(entity.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_server_verification(
        &self,
        id: &str,
    ) -> Result<Option<ServerVerificationEntity>> {
        let entity = sqlx::query_as::<_, ServerVerificationEntity>(
            "SELECT id, payload, created_at FROM server_verifications WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entity)
    }
}

#[async_trait]
impl WorkerJobStore for PgPipelineStore {
    async fn save_worker_job(&self, job: &WorkerJob) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO worker_jobs ({WORKER_JOB_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(&job.worker_name)
        .bind(&job.task_id)
        .bind(&job.worker_secret)
        .bind(job.template)
        .bind(&job.task_config)
        .bind(job.is_last_task)
        .bind(job.state)
        .bind(job.last_health_check_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_worker_job(&self, worker_name: &str) -> Result<Option<WorkerJob>> {
        let job = sqlx::query_as::<_, WorkerJob>(&format!(
            "SELECT {WORKER_JOB_COLUMNS} FROM worker_jobs WHERE worker_name = $1"
        ))
        .bind(worker_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    async fn update_worker_job_state(
        &self,
        worker_name: &str,
        state: WorkerJobState,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE worker_jobs SET state = $2, updated_at = NOW() WHERE worker_name = $1",
        )
        .bind(worker_name)
        .bind(state)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_worker_health_check(
        &self,
        worker_name: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE worker_jobs SET last_health_check_at = $2, updated_at = NOW() \
             WHERE worker_name = $1",
        )
        .bind(worker_name)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_worker_jobs(&self, task_id: &str) -> Result<Vec<WorkerJob>> {
        let jobs = sqlx::query_as::<_, WorkerJob>(&format!(
            "SELECT {WORKER_JOB_COLUMNS} FROM worker_jobs WHERE task_id = $1 \
             ORDER BY created_at"
        ))
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }
}
