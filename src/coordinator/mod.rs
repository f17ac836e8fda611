//! # Pipeline Coordinators
//!
//! Intake of post and site intents, batching into tasks, dispatch of the job
//! chains and the reactions to task completion or failure.
//!
//! The coordinators never block on a worker. Dispatch returns once the jobs
//! are queued; outcomes come back as [`PipelineEvent`](crate::events::PipelineEvent)s
//! routed by the [`PipelineEventHandler`].

use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, Instrument};

use crate::dispatcher::{DomainConfig, TaskDispatcher};
use crate::error::Result;
use crate::models::{GitRepoSetting, SiteConfig};
use crate::providers::{GitProviderType, ProviderRegistry};
use crate::provenance::ProvenanceVerifier;
use crate::state_machine::TaskLifecycle;
use crate::store::PipelineStore;

pub mod event_loop;
pub mod notifier;
pub mod post_pipeline;
pub mod site_pipeline;
pub mod site_source;

pub use event_loop::PipelineEventHandler;
pub use notifier::{NoopNotifier, PublishNotifier, SitePublishedNotification, WebhookNotifier};
pub use post_pipeline::{FlushedBatch, PostPipelineCoordinator, SubmitPostRequest};
pub use site_pipeline::{DeploySiteRequest, SiteDispatch, SitePipelineCoordinator};
pub use site_source::{InMemorySiteConfigSource, PgSiteConfigSource, SiteConfigSource};

/// Collaborators shared by both coordinators
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn PipelineStore>,
    pub lifecycle: TaskLifecycle,
    pub dispatcher: TaskDispatcher,
    pub sites: Arc<dyn SiteConfigSource>,
    pub registry: Arc<ProviderRegistry>,
    pub verifier: ProvenanceVerifier,
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("dispatcher", &self.dispatcher)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl PipelineContext {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        dispatcher: TaskDispatcher,
        sites: Arc<dyn SiteConfigSource>,
        registry: Arc<ProviderRegistry>,
        verifier: ProvenanceVerifier,
    ) -> Self {
        Self {
            lifecycle: TaskLifecycle::new(store.clone()),
            store,
            dispatcher,
            sites,
            registry,
            verifier,
        }
    }

    /// Config shared by every job of a site: git credentials of the source
    /// repository, site metadata, theme and ownership.
    pub(crate) fn site_domain_config(
        &self,
        site: &SiteConfig,
        storage_type: GitProviderType,
        storage_repo: &GitRepoSetting,
    ) -> Result<DomainConfig> {
        let git_info = self
            .registry
            .git_storage_provider(storage_type)?
            .generate_git_info(storage_repo);
        DomainConfig::new()
            .with("gitInfo", &git_info)?
            .with("siteInfo", &site.site_info)?
            .with("template", &site.template)?
            .with(
                "metaspace",
                &json!({ "userId": site.user_id, "siteConfigId": site.id }),
            )
    }
}

/// Run a background job chain, logging its failure under `name`
pub(crate) fn supervise<F>(name: &'static str, task_id: String, future: F) -> JoinHandle<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let span = tracing::info_span!("pipeline_chain", chain = name, task_id = %task_id);
    tokio::spawn(
        async move {
            if let Err(e) = future.await {
                error!(error = %e, "Background job chain failed");
            }
        }
        .instrument(span),
    )
}
