use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::notifier::{PublishNotifier, SitePublishedNotification};
use super::site_source::{resolve_publisher, resolve_storage};
use super::PipelineContext;
use crate::dispatcher::StepPlanner;
use crate::error::{PipelineError, Result};
use crate::logging::log_order_operation;
use crate::models::{
    DeploySiteOrder, PipelineTask, PublishSiteOrder, ServerVerificationEntity, SiteConfig,
    SiteStatus, TaskMethod, TaskWorkspace,
};
use crate::providers::{DnsProviderType, DnsRecord};
use crate::provenance::SiteDigestFields;
use crate::storage::MetadataStorageType;

/// Deploy intent, optionally carrying the author's provenance chain over the
/// site metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploySiteRequest {
    pub user_id: i64,
    pub site_config_id: i64,
    pub storage_type: Option<MetadataStorageType>,
    pub author_digest_ref: Option<String>,
    pub author_signature_ref: Option<String>,
}

impl DeploySiteRequest {
    pub fn unsigned(user_id: i64, site_config_id: i64) -> Self {
        Self {
            user_id,
            site_config_id,
            storage_type: None,
            author_digest_ref: None,
            author_signature_ref: None,
        }
    }
}

/// A site order whose task was created and queued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteDispatch {
    pub order_id: String,
    pub task_id: String,
    pub workspace: TaskWorkspace,
}

/// Deploy and publish of whole sites
#[derive(Clone)]
pub struct SitePipelineCoordinator {
    ctx: PipelineContext,
    notifier: Arc<dyn PublishNotifier>,
    auto_publish_after_deploy: bool,
}

impl std::fmt::Debug for SitePipelineCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SitePipelineCoordinator")
            .field("auto_publish_after_deploy", &self.auto_publish_after_deploy)
            .finish_non_exhaustive()
    }
}

impl SitePipelineCoordinator {
    pub fn new(
        ctx: PipelineContext,
        notifier: Arc<dyn PublishNotifier>,
        auto_publish_after_deploy: bool,
    ) -> Self {
        Self {
            ctx,
            notifier,
            auto_publish_after_deploy,
        }
    }

    async fn owned_site(&self, user_id: i64, site_config_id: i64) -> Result<SiteConfig> {
        let site = self.ctx.sites.get_site_config(site_config_id).await?;
        if site.user_id != user_id {
            return Err(PipelineError::not_found(format!(
                "Site config {site_config_id} not found for user {user_id}"
            )));
        }
        Ok(site)
    }

    /// Verify the optional site provenance chain and persist its server
    /// verification. Returns the verification id, empty when unsigned.
    async fn verify_site(&self, request: &DeploySiteRequest, site: &SiteConfig) -> Result<String> {
        let digest_ref = request.author_digest_ref.as_deref();
        let signature_ref = request.author_signature_ref.as_deref();
        let storage_type = match request.storage_type {
            Some(storage_type) => storage_type,
            None if digest_ref.is_none() && signature_ref.is_none() => return Ok(String::new()),
            None => {
                return Err(PipelineError::validation(
                    "Metadata storage type is required for signed sites",
                ))
            }
        };

        let Some(chain) = self
            .ctx
            .verifier
            .generate_and_upload::<SiteDigestFields>(storage_type, digest_ref, signature_ref)
            .await?
        else {
            return Ok(String::new());
        };
        if chain.digest.fields != SiteDigestFields::from(&site.site_info) {
            return Err(PipelineError::validation(
                "Site info does not match the signed digest",
            ));
        }
        let id = chain.verification.signature.clone();
        self.ctx
            .store
            .save_server_verification(&ServerVerificationEntity::new(
                id.clone(),
                serde_json::to_value(&chain.verification)?,
            ))
            .await?;
        Ok(id)
    }

    /// Create a deploy order and task for the site and queue its job.
    ///
    /// The site moves to `DEPLOYING` before dispatch and back to its previous
    /// status when dispatch fails synchronously.
    pub async fn deploy_site(&self, request: DeploySiteRequest) -> Result<SiteDispatch> {
        let site = self
            .owned_site(request.user_id, request.site_config_id)
            .await?;
        let (storage_type, storage_repo) = resolve_storage(self.ctx.sites.as_ref(), &site).await?;
        let server_verification_id = self.verify_site(&request, &site).await?;

        let order = DeploySiteOrder::new(
            Uuid::new_v4().to_string(),
            site.user_id,
            site.id,
            server_verification_id,
        );
        self.ctx.store.save_deploy_site_order(&order).await?;

        let task = PipelineTask::new(TaskMethod::DeploySite, site.user_id, site.id);
        let workspace = self.ctx.store.create_task(&task).await?;
        self.ctx
            .store
            .link_deploy_site_order(&order.id, &task.id)
            .await?;
        self.ctx.lifecycle.doing_task(&task.id).await?;
        log_order_operation(
            "deploy_site",
            &order.id,
            Some(site.user_id),
            "dispatching",
            Some(&task.id),
        );

        let previous = site.status;
        let is_last_task = !self.auto_publish_after_deploy;
        let dispatched = async {
            self.ctx
                .sites
                .update_site_status(site.id, SiteStatus::Deploying)
                .await?;
            let mut domain =
                self.ctx
                    .site_domain_config(&site, storage_type, &storage_repo)?;
            if let Ok((publisher_type, publisher_repo)) =
                resolve_publisher(self.ctx.sites.as_ref(), &site).await
            {
                let publish_info = self
                    .ctx
                    .registry
                    .git_publisher_provider(publisher_type)?
                    .generate_publish_info(&publisher_repo, &site.site_info);
                domain = domain.with("publishInfo", &publish_info)?;
            }
            let steps = StepPlanner::deploy(
                site.template.template_type,
                storage_repo.is_repo_empty,
                is_last_task,
            );
            self.ctx
                .dispatcher
                .dispatch_task(&task, site.template.template_type, steps, domain, is_last_task)
                .await
        }
        .await;

        if let Err(e) = dispatched {
            self.rollback(&task.id, site.id, previous, &e).await;
            return Err(e);
        }

        info!(site_config_id = site.id, task_id = %task.id, "🚀 Site deploy queued");
        Ok(SiteDispatch {
            order_id: order.id,
            task_id: task.id,
            workspace,
        })
    }

    /// Publish intent plus its dispatch.
    ///
    /// Rejected with `WorkspaceLocked` before any order is recorded while
    /// another task holds the site.
    pub async fn publish_site(&self, user_id: i64, site_config_id: i64) -> Result<SiteDispatch> {
        let site = self.owned_site(user_id, site_config_id).await?;
        if let Some(holder) = self.ctx.store.find_active_site_task(site.id).await? {
            return Err(PipelineError::WorkspaceLocked {
                site_config_id: site.id,
                task_id: holder.id,
            });
        }
        let order = self.publish_order_for(&site).await?;
        self.start_publish(&order).await
    }

    /// Publish order for the site. A PENDING order still waiting for its task
    /// is reused, so posts queued behind it are never split across orders.
    pub async fn create_publish_site_order(
        &self,
        user_id: i64,
        site_config_id: i64,
    ) -> Result<PublishSiteOrder> {
        let site = self.owned_site(user_id, site_config_id).await?;
        self.publish_order_for(&site).await
    }

    async fn publish_order_for(&self, site: &SiteConfig) -> Result<PublishSiteOrder> {
        if let Some(pending) = self
            .ctx
            .store
            .find_pending_publish_site_order(site.id)
            .await?
        {
            debug!(order_id = %pending.id, site_config_id = site.id, "Reusing pending publish site order");
            return Ok(pending);
        }
        let order = PublishSiteOrder::new(Uuid::new_v4().to_string(), site.user_id, site.id, "");
        self.ctx.store.save_publish_site_order(&order).await?;
        log_order_operation("create_publish_site_order", &order.id, Some(site.user_id), "pending", None);
        Ok(order)
    }

    /// Create the publish task for a pending publish order, claim every post
    /// of the site waiting on a publish, and queue the job.
    pub async fn start_publish(&self, order: &PublishSiteOrder) -> Result<SiteDispatch> {
        let site = self.ctx.sites.get_site_config(order.site_config_id).await?;
        let (storage_type, storage_repo) = resolve_storage(self.ctx.sites.as_ref(), &site).await?;
        let (publisher_type, publisher_repo) =
            resolve_publisher(self.ctx.sites.as_ref(), &site).await?;

        let task = PipelineTask::new(TaskMethod::PublishSite, site.user_id, site.id);
        let workspace = self.ctx.store.create_task(&task).await?;
        if !self
            .ctx
            .store
            .link_publish_site_order(&order.id, &task.id)
            .await?
        {
            warn!(order_id = %order.id, "Publish site order was already linked");
        }
        let posts = self
            .ctx
            .store
            .claim_post_orders_for_publish(site.user_id, site.id, &order.id, &task.id)
            .await?;
        self.ctx.lifecycle.doing_task(&task.id).await?;
        log_order_operation(
            "publish_site",
            &order.id,
            Some(site.user_id),
            "dispatching",
            Some(&format!("task={} posts={posts}", task.id)),
        );

        let previous = site.status;
        let dispatched = async {
            self.ctx
                .sites
                .update_site_status(site.id, SiteStatus::Publishing)
                .await?;
            let publish_info = self
                .ctx
                .registry
                .git_publisher_provider(publisher_type)?
                .generate_publish_info(&publisher_repo, &site.site_info);
            let domain = self
                .ctx
                .site_domain_config(&site, storage_type, &storage_repo)?
                .with("publishInfo", &publish_info)?;
            let steps = StepPlanner::publish(site.template.template_type, publisher_type);
            self.ctx
                .dispatcher
                .dispatch_task(&task, site.template.template_type, steps, domain, true)
                .await
        }
        .await;

        if let Err(e) = dispatched {
            self.rollback(&task.id, site.id, previous, &e).await;
            return Err(e);
        }

        info!(site_config_id = site.id, task_id = %task.id, posts, "🚀 Site publish queued");
        Ok(SiteDispatch {
            order_id: order.id.clone(),
            task_id: task.id,
            workspace,
        })
    }

    /// Start the site's deferred publish order once its workspace is free.
    ///
    /// `Ok(None)` when nothing is waiting or another task holds the site.
    pub async fn resume_pending_publish(&self, site_config_id: i64) -> Result<Option<SiteDispatch>> {
        if self
            .ctx
            .store
            .find_active_site_task(site_config_id)
            .await?
            .is_some()
        {
            return Ok(None);
        }
        let Some(order) = self
            .ctx
            .store
            .find_pending_publish_site_order(site_config_id)
            .await?
        else {
            return Ok(None);
        };
        match self.start_publish(&order).await {
            Ok(dispatch) => {
                info!(publish_site_order_id = %order.id, task_id = %dispatch.task_id, "Deferred publish started");
                Ok(Some(dispatch))
            }
            Err(PipelineError::WorkspaceLocked { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Synchronous dispatch failure: fail the task and restore the status
    async fn rollback(&self, task_id: &str, site_config_id: i64, previous: SiteStatus, cause: &PipelineError) {
        if let Err(e) = self.ctx.lifecycle.fail_task(task_id, &cause.to_string()).await {
            warn!(task_id, error = %e, "Failed to fail task after dispatch error");
        }
        if let Err(e) = self
            .ctx
            .sites
            .update_site_status(site_config_id, previous)
            .await
        {
            warn!(site_config_id, error = %e, "Failed to roll back site status");
        }
        warn!(task_id, site_config_id, status = %previous, "↩️ Site status rolled back");
    }

    /// Deploy finished: `DEPLOYED`, and the follow-up publish when enabled
    pub async fn on_deploy_finished(&self, task_id: &str) -> Result<Option<SiteDispatch>> {
        let task = self.ctx.lifecycle.finish_task(task_id, None).await?;
        let site = self.ctx.sites.get_site_config(task.site_config_id).await?;
        self.ctx
            .sites
            .update_site_status(site.id, SiteStatus::Deployed)
            .await?;
        if let Some(repo_id) = site.storage_provider_id {
            self.ctx.sites.mark_repo_initialized(repo_id).await?;
        }
        info!(site_config_id = site.id, task_id, "✅ Site deployed");

        if !self.auto_publish_after_deploy {
            return Ok(None);
        }
        self.publish_site(site.user_id, site.id).await.map(Some)
    }

    pub async fn on_deploy_failed(&self, task_id: &str, reason: &str) -> Result<()> {
        let task = self.ctx.lifecycle.fail_task(task_id, reason).await?;
        self.ctx
            .sites
            .update_site_status(task.site_config_id, SiteStatus::DeployFailed)
            .await
    }

    /// Publish finished: `PUBLISHED`, managed-domain CNAME and notification.
    ///
    /// DNS and notification failures are logged; the publish itself already
    /// succeeded.
    pub async fn on_publish_finished(&self, task_id: &str) -> Result<()> {
        let task = self.ctx.lifecycle.finish_task(task_id, None).await?;
        let site = self.ctx.sites.get_site_config(task.site_config_id).await?;
        self.ctx
            .sites
            .update_site_status(site.id, SiteStatus::Published)
            .await?;

        let (publisher_type, publisher_repo) =
            resolve_publisher(self.ctx.sites.as_ref(), &site).await?;
        let publisher = self.ctx.registry.git_publisher_provider(publisher_type)?;
        let publish_info = publisher.generate_publish_info(&publisher_repo, &site.site_info);

        if !site.site_info.domain.is_empty() {
            let record = DnsRecord::cname(&site.site_info.domain, publisher.pages_host(&publisher_repo));
            match self.ctx.registry.dns_provider(DnsProviderType::Cloudflare) {
                Ok(dns) => {
                    if let Err(e) = dns.update_dns_record(&record).await {
                        warn!(site_config_id = site.id, error = %e, "DNS update failed");
                    }
                }
                Err(_) => debug!(domain = %record.name, "No DNS provider registered"),
            }
        }

        let notification = SitePublishedNotification {
            user_id: site.user_id,
            site_config_id: site.id,
            publish_site_task_id: task.id.clone(),
            site_url: publish_info.site_url,
            published_at: Utc::now(),
        };
        if let Err(e) = self.notifier.site_published(&notification).await {
            warn!(site_config_id = site.id, error = %e, "Publish notification failed");
        }
        info!(
            site_config_id = site.id,
            task_id,
            site_url = %notification.site_url,
            "✅ Site published"
        );
        Ok(())
    }

    pub async fn on_publish_failed(&self, task_id: &str, reason: &str) -> Result<()> {
        let task = self.ctx.lifecycle.fail_task(task_id, reason).await?;
        self.ctx
            .sites
            .update_site_status(task.site_config_id, SiteStatus::PublishFailed)
            .await
    }
}
