//! # Metaspace Pipeline Server
//!
//! Wires configuration, stores, queue, coordinators, the job runner and the
//! worker callback API into one process.
//!
//! ```bash
//! PIPELINE_ENV=production pipeline-server
//! ```

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

use metaspace_pipeline::config::{ConfigManager, PipelineConfig, ProcessorKind, QueueBackend};
use metaspace_pipeline::coordinator::{
    InMemorySiteConfigSource, NoopNotifier, PgSiteConfigSource, PipelineContext,
    PipelineEventHandler, PostPipelineCoordinator, PublishNotifier, SiteConfigSource,
    SitePipelineCoordinator, WebhookNotifier,
};
use metaspace_pipeline::dispatcher::{
    DockerProcessor, InMemoryJobQueue, JobQueue, JobRunner, MockProcessor, PgmqJobQueue,
    Processor, TaskDispatcher,
};
use metaspace_pipeline::events::EventPublisher;
use metaspace_pipeline::logging;
use metaspace_pipeline::provenance::{ProvenanceVerifier, ServerKeys};
use metaspace_pipeline::providers::ProviderRegistry;
use metaspace_pipeline::storage::StorageGateway;
use metaspace_pipeline::store::{InMemoryPipelineStore, PgPipelineStore, PipelineStore};
use metaspace_pipeline::web::{create_app, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let manager = ConfigManager::load().context("Failed to load pipeline configuration")?;
    let config = manager.config().clone();
    logging::init_structured_logging(config.logging.json);

    info!("🚀 Starting Metaspace Pipeline Server...");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));
    info!("   Environment: {}", manager.environment());

    let (store, sites, queue) = build_persistence(&config).await?;

    let events = EventPublisher::default();
    let registry = Arc::new(ProviderRegistry::from_config(&config.providers));
    let keys = Arc::new(
        ServerKeys::from_hex(&config.provenance.server_private_key)
            .context("Invalid server private key")?,
    );
    let verifier = ProvenanceVerifier::new(
        StorageGateway::new(registry.clone()),
        keys,
        config.provenance.server_domain.clone(),
    );
    let dispatcher = TaskDispatcher::new(store.clone(), queue.clone(), events.clone());

    let notifier: Arc<dyn PublishNotifier> = match &config.notifier.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(NoopNotifier),
    };
    let ctx = PipelineContext::new(
        store.clone(),
        dispatcher.clone(),
        sites,
        registry,
        verifier,
    );
    let site_pipeline = Arc::new(SitePipelineCoordinator::new(
        ctx.clone(),
        notifier,
        config.pipeline.auto_publish_after_deploy,
    ));
    let post_pipeline = Arc::new(PostPipelineCoordinator::new(
        ctx,
        site_pipeline.clone(),
        config.provenance.certificate_storage,
    ));

    let handler = PipelineEventHandler::new(store.clone(), post_pipeline, site_pipeline);
    let handler_task = handler.spawn(events.subscribe());

    let processor: Arc<dyn Processor> = match config.runner.processor {
        ProcessorKind::Docker => Arc::new(DockerProcessor::new(config.worker.clone())),
        ProcessorKind::Mock => Arc::new(MockProcessor::new(dispatcher.clone(), &config.runner)),
    };
    let runner = JobRunner::new(
        store,
        queue,
        processor,
        events,
        config.queue.poll_interval(),
    );
    let runner_task = runner.spawn();

    let listener = tokio::net::TcpListener::bind(&config.web.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.web.bind_address))?;
    info!("🎉 Pipeline Server listening on {}", config.web.bind_address);
    info!("   Press Ctrl+C to shutdown gracefully");

    axum::serve(listener, create_app(AppState::new(dispatcher)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Web server failed")?;

    info!("🛑 Shutdown signal received, stopping background loops...");
    runner.shutdown();
    handler.shutdown();
    let _ = tokio::join!(runner_task, handler_task);
    info!("👋 Pipeline Server shutdown complete");
    Ok(())
}

type Persistence = (
    Arc<dyn PipelineStore>,
    Arc<dyn SiteConfigSource>,
    Arc<dyn JobQueue>,
);

async fn build_persistence(config: &PipelineConfig) -> Result<Persistence> {
    let Some(url) = &config.database.url else {
        warn!("No database configured, running on in-memory stores");
        return Ok((
            Arc::new(InMemoryPipelineStore::new()),
            Arc::new(InMemorySiteConfigSource::new()),
            Arc::new(InMemoryJobQueue::new(config.queue.queue_name.clone())),
        ));
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    let store = PgPipelineStore::new(pool.clone());
    if config.database.run_migrations {
        store.migrate().await?;
    }

    let queue: Arc<dyn JobQueue> = match config.queue.backend {
        QueueBackend::Pgmq => {
            let queue = PgmqJobQueue::new(
                pool.clone(),
                config.queue.queue_name.clone(),
                config.queue.visibility_timeout_seconds,
            );
            queue.ensure_queue().await?;
            Arc::new(queue)
        }
        QueueBackend::InMemory => Arc::new(InMemoryJobQueue::new(config.queue.queue_name.clone())),
    };

    Ok((
        Arc::new(store),
        Arc::new(PgSiteConfigSource::new(pool)),
        queue,
    ))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received SIGTERM");
        },
    }
}
