use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::site_pipeline::{SiteDispatch, SitePipelineCoordinator};
use super::site_source::resolve_storage;
use super::{supervise, PipelineContext};
use crate::dispatcher::{DomainConfig, StepPlanner, TaskStep};
use crate::error::{PipelineError, Result};
use crate::logging::log_order_operation;
use crate::models::{
    OrderTaskState, PageRequest, Pagination, PipelineTask, PostAction, PostContent, PostMetadata,
    PostOrder, ServerVerificationEntity, SiteConfig, TemplateType,
};
use crate::provenance::PostDigestFields;
use crate::storage::MetadataStorageType;

/// Post publication intent as handed over by the intake layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitPostRequest {
    pub user_id: i64,
    pub site_config_id: i64,
    pub action: PostAction,
    pub content: PostContent,
    pub is_draft: bool,
    /// Where the author's digest and signature are stored
    pub storage_type: MetadataStorageType,
    pub author_digest_ref: Option<String>,
    pub author_signature_ref: Option<String>,
}

/// Orders claimed by one flush and the handle of its background job chain
#[derive(Debug)]
pub struct FlushedBatch {
    pub task_id: String,
    pub order_ids: Vec<String>,
    pub chain: JoinHandle<()>,
}

/// Post intake, batching and the post side of publishing
#[derive(Clone)]
pub struct PostPipelineCoordinator {
    ctx: PipelineContext,
    sites: Arc<SitePipelineCoordinator>,
    certificate_storage: Option<MetadataStorageType>,
}

impl std::fmt::Debug for PostPipelineCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostPipelineCoordinator")
            .field("certificate_storage", &self.certificate_storage)
            .finish_non_exhaustive()
    }
}

impl PostPipelineCoordinator {
    pub fn new(
        ctx: PipelineContext,
        sites: Arc<SitePipelineCoordinator>,
        certificate_storage: Option<MetadataStorageType>,
    ) -> Self {
        Self {
            ctx,
            sites,
            certificate_storage,
        }
    }

    /// Verify provenance, store the snapshot and create a PENDING order.
    ///
    /// A signed post is keyed by the author signature, so resubmitting the
    /// same chain returns the existing order. Unsigned posts get a fresh id.
    pub async fn submit_post(&self, request: SubmitPostRequest) -> Result<PostOrder> {
        let site = self.ctx.sites.get_site_config(request.site_config_id).await?;
        if site.user_id != request.user_id {
            return Err(PipelineError::not_found(format!(
                "Site config {} not found for user {}",
                request.site_config_id, request.user_id
            )));
        }
        StepPlanner::post_business(site.template.template_type, request.action, request.is_draft)?;

        let chain = self
            .ctx
            .verifier
            .generate_and_upload::<PostDigestFields>(
                request.storage_type,
                request.author_digest_ref.as_deref(),
                request.author_signature_ref.as_deref(),
            )
            .await?;

        let (id, server_verification_id) = match &chain {
            Some(chain) => {
                if chain.digest.fields != PostDigestFields::from(&request.content) {
                    return Err(PipelineError::validation(
                        "Post content does not match the signed digest",
                    ));
                }
                let verification_id = chain.verification.signature.clone();
                self.ctx
                    .store
                    .save_server_verification(&ServerVerificationEntity::new(
                        verification_id.clone(),
                        serde_json::to_value(&chain.verification)?,
                    ))
                    .await?;
                (chain.signature.signature.clone(), verification_id)
            }
            None => (Uuid::new_v4().to_string(), String::new()),
        };

        if let Some(existing) = self.ctx.store.get_post_order(&id).await? {
            debug!(order_id = %id, "Post order already submitted");
            return Ok(existing);
        }

        self.ctx
            .store
            .save_post_metadata(&PostMetadata::new(
                id.clone(),
                request.user_id,
                request.content,
                request.is_draft,
            ))
            .await?;
        let order = PostOrder::new(
            id,
            request.user_id,
            request.site_config_id,
            request.action,
            server_verification_id,
        );
        self.ctx.store.save_post_order(&order).await?;
        log_order_operation(
            "submit_post",
            &order.id,
            Some(order.user_id),
            "pending",
            Some(order.action.as_str()),
        );
        Ok(order)
    }

    /// Batch the site's pending orders of one action into a task and start
    /// its job chain in the background.
    ///
    /// Actions are drained in CREATE, UPDATE, DELETE order, one per flush.
    /// `Ok(None)` when nothing is pending. Fails with `WorkspaceLocked` while
    /// another task holds the site.
    pub async fn flush_pending_posts(
        &self,
        user_id: i64,
        site_config_id: i64,
    ) -> Result<Option<FlushedBatch>> {
        let mut action = None;
        for candidate in PostAction::ALL {
            if self
                .ctx
                .store
                .count_pending_post_orders(user_id, site_config_id, candidate)
                .await?
                > 0
            {
                action = Some(candidate);
                break;
            }
        }
        let Some(action) = action else {
            return Ok(None);
        };

        let site = self.ctx.sites.get_site_config(site_config_id).await?;
        let task = PipelineTask::new(action.task_method(), user_id, site_config_id);
        self.ctx.store.create_task(&task).await?;

        let orders = self
            .ctx
            .store
            .claim_pending_post_orders(user_id, site_config_id, action, &task.id)
            .await?;
        self.ctx.lifecycle.doing_task(&task.id).await?;

        if orders.is_empty() {
            // another batcher claimed them between count and claim
            self.ctx.lifecycle.finish_task(&task.id, None).await?;
            return Ok(None);
        }

        let jobs = match self.plan_post_jobs(&site, action, &orders).await {
            Ok(jobs) => jobs,
            Err(e) => {
                self.ctx
                    .lifecycle
                    .fail_task(&task.id, &e.to_string())
                    .await?;
                return Err(e);
            }
        };

        info!(
            task_id = %task.id,
            site_config_id,
            action = %action,
            orders = orders.len(),
            "📦 Post batch claimed"
        );

        let ctx = self.ctx.clone();
        let template = site.template.template_type;
        let chain_task = task.clone();
        let chain = supervise("post", task.id.clone(), async move {
            let total = jobs.len();
            for (index, (steps, domain)) in jobs.into_iter().enumerate() {
                let is_last_task = index + 1 == total;
                if let Err(e) = ctx
                    .dispatcher
                    .dispatch_task(&chain_task, template, steps, domain, is_last_task)
                    .await
                {
                    ctx.lifecycle
                        .fail_task(&chain_task.id, &e.to_string())
                        .await?;
                    return Err(e);
                }
            }
            Ok(())
        });

        Ok(Some(FlushedBatch {
            task_id: task.id,
            order_ids: orders.into_iter().map(|o| o.id).collect(),
            chain,
        }))
    }

    /// Checkout, business and commit jobs of a batch
    async fn plan_post_jobs(
        &self,
        site: &SiteConfig,
        action: PostAction,
        orders: &[PostOrder],
    ) -> Result<Vec<(Vec<TaskStep>, DomainConfig)>> {
        let (storage_type, storage_repo) = resolve_storage(self.ctx.sites.as_ref(), site).await?;
        let base = self
            .ctx
            .site_domain_config(site, storage_type, &storage_repo)?;

        let posts = futures::future::try_join_all(orders.iter().map(|order| async move {
            self.ctx
                .store
                .get_post_metadata(&order.id)
                .await?
                .ok_or_else(|| {
                    PipelineError::not_found(format!("Post metadata {} not found", order.id))
                })
        }))
        .await?;
        let is_draft = site.template.template_type == TemplateType::Hexo
            && posts.iter().all(|post| post.is_draft);
        let business = StepPlanner::post_business(site.template.template_type, action, is_draft)?;
        let business_config = base.clone().with("posts", &posts)?;

        Ok(vec![
            (StepPlanner::post_checkout(), base.clone()),
            (business, business_config),
            (StepPlanner::post_commit(), base),
        ])
    }

    pub async fn doing_post_task(&self, task_id: &str) -> Result<PipelineTask> {
        self.ctx.lifecycle.doing_task(task_id).await
    }

    pub async fn finish_post_task(
        &self,
        task_id: &str,
        publish_site_order_id: Option<&str>,
    ) -> Result<PipelineTask> {
        self.ctx
            .lifecycle
            .finish_task(task_id, publish_site_order_id)
            .await
    }

    /// Posts are committed: queue them for a publish of the site and start it.
    ///
    /// The task is settled before anything else can fail. Without a publish
    /// order it fails. When another task grabbed the workspace in between, the
    /// posts stay publish-PENDING on the order, which starts once the site is
    /// free again.
    pub async fn on_post_task_finished(&self, task_id: &str) -> Result<Option<SiteDispatch>> {
        let task = self
            .ctx
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("Task {task_id} not found")))?;
        let order = match self
            .sites
            .create_publish_site_order(task.user_id, task.site_config_id)
            .await
        {
            Ok(order) => order,
            Err(e) => {
                warn!(task_id, error = %e, "No publish order for committed posts");
                self.ctx.lifecycle.fail_task(task_id, &e.to_string()).await?;
                return Err(e);
            }
        };
        self.finish_post_task(task_id, Some(&order.id)).await?;

        if self.certificate_storage.is_some() {
            for post in self.ctx.store.list_post_orders_for_task(task_id).await? {
                if post.is_verified() && post.certificate_state == OrderTaskState::None {
                    if let Err(e) = self.certify_post_order(&post.id).await {
                        warn!(order_id = %post.id, error = %e, "Certification failed");
                    }
                }
            }
        }

        match self.sites.start_publish(&order).await {
            Ok(dispatch) => Ok(Some(dispatch)),
            Err(PipelineError::WorkspaceLocked { task_id: holder, .. }) => {
                info!(
                    publish_site_order_id = %order.id,
                    holder = %holder,
                    "Publish deferred, workspace busy"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn on_post_task_failed(&self, task_id: &str, reason: &str) -> Result<PipelineTask> {
        self.ctx.lifecycle.fail_task(task_id, reason).await
    }

    /// Push the order's server verification to the certificate backend and
    /// record the returned reference.
    pub async fn certify_post_order(&self, order_id: &str) -> Result<PostOrder> {
        let storage_type = self
            .certificate_storage
            .ok_or_else(|| PipelineError::validation("Certificate storage is not configured"))?;
        let order = self
            .ctx
            .store
            .get_post_order(order_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("Post order {order_id} not found")))?;
        if !order.is_verified() {
            return Err(PipelineError::validation(
                "Post order has no server verification to certify",
            ));
        }
        let verification = self
            .ctx
            .store
            .get_server_verification(&order.server_verification_id)
            .await?
            .ok_or_else(|| {
                PipelineError::not_found(format!(
                    "Server verification {} not found",
                    order.server_verification_id
                ))
            })?;

        self.move_certificate(order_id, OrderTaskState::None, OrderTaskState::Pending, None)
            .await?;
        self.move_certificate(order_id, OrderTaskState::Pending, OrderTaskState::Doing, None)
            .await?;

        let uploaded = self
            .ctx
            .verifier
            .upload_certificate(
                storage_type,
                &format!("certificate-{order_id}.json"),
                &verification.payload,
            )
            .await;
        match uploaded {
            Ok(certificate_id) => {
                self.move_certificate(
                    order_id,
                    OrderTaskState::Doing,
                    OrderTaskState::Finished,
                    Some((certificate_id.clone(), storage_type)),
                )
                .await?;
                log_order_operation(
                    "certify_post_order",
                    order_id,
                    Some(order.user_id),
                    "finished",
                    Some(&certificate_id),
                );
            }
            Err(e) => {
                self.move_certificate(order_id, OrderTaskState::Doing, OrderTaskState::Failed, None)
                    .await?;
                return Err(e);
            }
        }

        self.ctx
            .store
            .get_post_order(order_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("Post order {order_id} not found")))
    }

    async fn move_certificate(
        &self,
        order_id: &str,
        from: OrderTaskState,
        to: OrderTaskState,
        certificate: Option<(String, MetadataStorageType)>,
    ) -> Result<()> {
        let moved = self
            .ctx
            .store
            .update_post_order_certificate(order_id, from, to, certificate)
            .await?;
        if !moved {
            return Err(PipelineError::validation(format!(
                "Certificate of post order {order_id} is not {from}"
            )));
        }
        Ok(())
    }

    pub async fn page_post_orders(
        &self,
        user_id: i64,
        site_config_id: Option<i64>,
        page: PageRequest,
    ) -> Result<Pagination<PostOrder>> {
        self.ctx
            .store
            .page_post_orders(user_id, site_config_id, page)
            .await
    }

    /// Flush pending posts of a site whose workspace is free
    pub async fn drain_pending_posts(&self, user_id: i64, site_config_id: i64) -> Result<Option<FlushedBatch>> {
        if self
            .ctx
            .store
            .find_active_site_task(site_config_id)
            .await?
            .is_some()
        {
            return Ok(None);
        }
        match self.flush_pending_posts(user_id, site_config_id).await {
            Err(PipelineError::WorkspaceLocked { .. }) => Ok(None),
            other => other,
        }
    }
}
