//! In-process pipeline: in-memory store, queue and content storage, a scripted
//! worker backend, and recording DNS and notification providers.

#![allow(dead_code)]

pub mod builders;
pub mod strategies;

pub use builders::*;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use metaspace_pipeline::coordinator::{
    InMemorySiteConfigSource, PipelineContext, PipelineEventHandler, PostPipelineCoordinator,
    PublishNotifier, SiteConfigSource, SitePipelineCoordinator, SitePublishedNotification,
};
use metaspace_pipeline::dispatcher::{InMemoryJobQueue, JobRunner, Processor, TaskDispatcher};
use metaspace_pipeline::error::{PipelineError, Result};
use metaspace_pipeline::events::{EventPublisher, PipelineEvent, PublishedEvent};
use metaspace_pipeline::models::{GitRepoSetting, SiteConfig, SiteStatus, WorkerJob};
use metaspace_pipeline::provenance::{ProvenanceVerifier, ServerKeys};
use metaspace_pipeline::providers::{
    DnsProvider, DnsProviderType, DnsRecord, GitProviderType, GithubProvider, ProviderRegistry,
};
use metaspace_pipeline::storage::{InMemoryContentStorage, MetadataStorageType, StorageGateway};
use metaspace_pipeline::store::InMemoryPipelineStore;

pub const SERVER_DOMAIN: &str = "metaspaces.life";

/// Worker backend that fails any job containing one of the configured steps
#[derive(Default)]
pub struct ScriptedProcessor {
    failing_steps: Mutex<HashSet<String>>,
    executed: Mutex<Vec<WorkerJob>>,
}

impl ScriptedProcessor {
    pub fn fail_on_step(&self, step: &str) {
        self.failing_steps.lock().insert(step.to_string());
    }

    pub fn executed(&self) -> Vec<WorkerJob> {
        self.executed.lock().clone()
    }
}

fn job_steps(job: &WorkerJob) -> Vec<String> {
    job.task_config["task"]["taskSteps"]
        .as_array()
        .map(|steps| {
            steps
                .iter()
                .filter_map(|step| step.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Processor for ScriptedProcessor {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn process(&self, job: &WorkerJob) -> Result<()> {
        self.executed.lock().push(job.clone());
        let failing = self.failing_steps.lock();
        if let Some(step) = job_steps(job).iter().find(|step| failing.contains(*step)) {
            return Err(PipelineError::worker_execution(format!(
                "step {step} exited with code 1"
            )));
        }
        Ok(())
    }
}

/// In-memory site configs whose reads or status writes can be switched to fail
#[derive(Default)]
pub struct FaultySiteSource {
    inner: InMemorySiteConfigSource,
    fail_reads: AtomicBool,
    fail_status_writes: AtomicBool,
}

impl FaultySiteSource {
    pub fn insert_site(&self, site: SiteConfig) {
        self.inner.insert_site(site);
    }

    pub fn insert_repo(&self, repo: GitRepoSetting) {
        self.inner.insert_repo(repo);
    }

    pub fn status(&self, id: i64) -> Option<SiteStatus> {
        self.inner.status(id)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_status_writes(&self, fail: bool) {
        self.fail_status_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SiteConfigSource for FaultySiteSource {
    async fn get_site_config(&self, id: i64) -> Result<SiteConfig> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(PipelineError::internal("site config service unavailable"));
        }
        self.inner.get_site_config(id).await
    }

    async fn get_git_repo_setting(&self, id: i64) -> Result<GitRepoSetting> {
        self.inner.get_git_repo_setting(id).await
    }

    async fn update_site_status(&self, id: i64, status: SiteStatus) -> Result<()> {
        if self.fail_status_writes.load(Ordering::SeqCst) {
            return Err(PipelineError::internal("site status write rejected"));
        }
        self.inner.update_site_status(id, status).await
    }

    async fn mark_repo_initialized(&self, repo_id: i64) -> Result<()> {
        self.inner.mark_repo_initialized(repo_id).await
    }
}

#[derive(Default)]
pub struct RecordingDns {
    pub records: Mutex<Vec<DnsRecord>>,
}

#[async_trait]
impl DnsProvider for RecordingDns {
    fn provider_type(&self) -> DnsProviderType {
        DnsProviderType::Cloudflare
    }

    async fn update_dns_record(&self, record: &DnsRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<SitePublishedNotification>>,
}

#[async_trait]
impl PublishNotifier for RecordingNotifier {
    async fn site_published(&self, notification: &SitePublishedNotification) -> Result<()> {
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}

pub struct HarnessOptions {
    pub auto_publish_after_deploy: bool,
    pub certificate_storage: Option<MetadataStorageType>,
    pub storage_repo_empty: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            auto_publish_after_deploy: false,
            certificate_storage: None,
            storage_repo_empty: false,
        }
    }
}

pub struct Harness {
    pub store: Arc<InMemoryPipelineStore>,
    pub site_source: Arc<FaultySiteSource>,
    pub queue: Arc<InMemoryJobQueue>,
    pub events: EventPublisher,
    pub dispatcher: TaskDispatcher,
    pub gateway: StorageGateway,
    pub verifier: ProvenanceVerifier,
    pub dns: Arc<RecordingDns>,
    pub notifier: Arc<RecordingNotifier>,
    pub processor: Arc<ScriptedProcessor>,
    pub runner: JobRunner,
    pub sites: Arc<SitePipelineCoordinator>,
    pub posts: Arc<PostPipelineCoordinator>,
    pub handler: PipelineEventHandler,
    receiver: Mutex<broadcast::Receiver<PublishedEvent>>,
    handled: Mutex<Vec<PipelineEvent>>,
    handler_errors: Mutex<Vec<PipelineError>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(HarnessOptions::default())
    }

    pub fn with_options(options: HarnessOptions) -> Self {
        let store = Arc::new(InMemoryPipelineStore::new());
        let site_source = Arc::new(FaultySiteSource::default());
        site_source.insert_site(SiteBuilder::new().build());
        site_source.insert_repo(repo(STORAGE_REPO_ID, "notes-src", options.storage_repo_empty));
        site_source.insert_repo(repo(PUBLISHER_REPO_ID, "alice.github.io", false));

        let queue = Arc::new(InMemoryJobQueue::new("pipeline_jobs"));
        let events = EventPublisher::default();
        let receiver = events.subscribe();
        let dispatcher = TaskDispatcher::new(store.clone(), queue.clone(), events.clone());

        let dns = Arc::new(RecordingDns::default());
        let registry = Arc::new(
            ProviderRegistry::builder()
                .with_git_provider(GitProviderType::Github, Arc::new(GithubProvider))
                .with_dns(DnsProviderType::Cloudflare, dns.clone())
                .with_metadata_storage(Arc::new(InMemoryContentStorage::new(
                    MetadataStorageType::Ipfs,
                )))
                .with_metadata_storage(Arc::new(InMemoryContentStorage::new(
                    MetadataStorageType::Arweave,
                )))
                .build(),
        );
        let gateway = StorageGateway::new(registry.clone());
        let verifier = ProvenanceVerifier::new(
            gateway.clone(),
            Arc::new(ServerKeys::generate()),
            SERVER_DOMAIN,
        );

        let notifier = Arc::new(RecordingNotifier::default());
        let ctx = PipelineContext::new(
            store.clone(),
            dispatcher.clone(),
            site_source.clone(),
            registry,
            verifier.clone(),
        );
        let sites = Arc::new(SitePipelineCoordinator::new(
            ctx.clone(),
            notifier.clone(),
            options.auto_publish_after_deploy,
        ));
        let posts = Arc::new(PostPipelineCoordinator::new(
            ctx,
            sites.clone(),
            options.certificate_storage,
        ));
        let handler = PipelineEventHandler::new(store.clone(), posts.clone(), sites.clone());

        let processor = Arc::new(ScriptedProcessor::default());
        let runner = JobRunner::new(
            store.clone(),
            queue.clone(),
            processor.clone(),
            events.clone(),
            Duration::from_millis(5),
        );

        Self {
            store,
            site_source,
            queue,
            events,
            dispatcher,
            gateway,
            verifier,
            dns,
            notifier,
            processor,
            runner,
            sites,
            posts,
            handler,
            receiver: Mutex::new(receiver),
            handled: Mutex::new(Vec::new()),
            handler_errors: Mutex::new(Vec::new()),
        }
    }

    pub fn insert_site(&self, site: SiteConfig) {
        self.site_source.insert_site(site);
    }

    /// Run queued jobs and route their events until the pipeline is idle.
    ///
    /// Background job chains get a few ticks to enqueue before the pipeline
    /// counts as idle. Panics when a handler returned an error.
    pub async fn settle(&self) {
        let errors = self.settle_collecting_errors().await;
        assert!(errors.is_empty(), "event handler errors: {errors:?}");
    }

    /// [`settle`](Self::settle), returning the handler errors instead
    pub async fn settle_collecting_errors(&self) -> Vec<PipelineError> {
        let mut idle_rounds = 0;
        while idle_rounds < 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let mut progressed = false;
            while self.runner.run_once().await.unwrap() {
                progressed = true;
                progressed |= self.route_events().await;
            }
            progressed |= self.route_events().await;
            idle_rounds = if progressed { 0 } else { idle_rounds + 1 };
        }
        std::mem::take(&mut *self.handler_errors.lock())
    }

    async fn route_events(&self) -> bool {
        let mut routed = false;
        loop {
            let next = self.receiver.lock().try_recv();
            match next {
                Ok(published) => {
                    if let Err(e) = self.handler.handle(&published.event).await {
                        self.handler_errors.lock().push(e);
                    }
                    self.handled.lock().push(published.event);
                    routed = true;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return routed,
            }
        }
    }

    /// Events routed so far by [`settle`](Self::settle)
    pub fn handled_events(&self) -> Vec<PipelineEvent> {
        self.handled.lock().clone()
    }
}
