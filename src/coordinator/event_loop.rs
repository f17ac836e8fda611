use std::sync::Arc;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::post_pipeline::PostPipelineCoordinator;
use super::site_pipeline::SitePipelineCoordinator;
use crate::error::{PipelineError, Result};
use crate::events::{PipelineEvent, PublishedEvent};
use crate::models::{OrderTaskState, PipelineTask, TaskKind};
use crate::store::PipelineStore;

/// Routes job outcomes to the coordinator owning the task
#[derive(Clone)]
pub struct PipelineEventHandler {
    store: Arc<dyn PipelineStore>,
    posts: Arc<PostPipelineCoordinator>,
    sites: Arc<SitePipelineCoordinator>,
    shutdown: Arc<Notify>,
}

impl std::fmt::Debug for PipelineEventHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEventHandler")
            .field("posts", &self.posts)
            .field("sites", &self.sites)
            .finish_non_exhaustive()
    }
}

impl PipelineEventHandler {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        posts: Arc<PostPipelineCoordinator>,
        sites: Arc<SitePipelineCoordinator>,
    ) -> Self {
        Self {
            store,
            posts,
            sites,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Apply one event.
    ///
    /// Post tasks run a chain of jobs, so success of an intermediate post job
    /// is ignored. Deploy and publish tasks run a single job whose success
    /// settles the task even when the worker keeps its workspace for a
    /// follow-up publish. Outcomes for tasks that are no longer DOING are
    /// dropped, so a failure reported twice (runner and worker) fails the task
    /// once. A task a handler could not settle is failed, and the handler's
    /// error is still returned.
    pub async fn handle(&self, event: &PipelineEvent) -> Result<()> {
        let Some(task) = self.store.get_task(event.task_id()).await? else {
            warn!(task_id = event.task_id(), event = event.name(), "Event for unknown task");
            return Ok(());
        };
        if let PipelineEvent::JobSucceeded {
            is_last_task: false,
            worker_name,
            ..
        } = event
        {
            if task.kind() == TaskKind::Post {
                debug!(worker_name = %worker_name, task_id = %task.id, "Intermediate job finished");
                return Ok(());
            }
        }
        if task.state != OrderTaskState::Doing {
            debug!(
                task_id = %task.id,
                state = %task.state,
                event = event.name(),
                "Task already settled, event dropped"
            );
            return Ok(());
        }

        let outcome = match event {
            PipelineEvent::JobSucceeded { .. } => self.on_succeeded(&task).await,
            PipelineEvent::JobFailed { reason, .. } | PipelineEvent::WorkerErrored { reason, .. } => {
                self.on_failed(&task, reason).await
            }
        };
        if let Err(e) = &outcome {
            self.fail_if_unsettled(&task, e).await;
        }

        self.resume_site(&task).await;
        outcome
    }

    /// A handler error must not leave the task holding the site's workspace
    async fn fail_if_unsettled(&self, task: &PipelineTask, cause: &PipelineError) {
        match self.store.get_task(&task.id).await {
            Ok(Some(current)) if current.state == OrderTaskState::Doing => {
                let reason = format!("Task could not be settled: {cause}");
                if let Err(e) = self.on_failed(&current, &reason).await {
                    error!(task_id = %task.id, error = %e, "Failed to fail unsettled task");
                }
            }
            Ok(_) => {}
            Err(e) => error!(task_id = %task.id, error = %e, "Failed to reload task"),
        }
    }

    /// Start what waits on the site: a deferred publish first, then pending posts
    async fn resume_site(&self, task: &PipelineTask) {
        match self.sites.resume_pending_publish(task.site_config_id).await {
            Ok(Some(dispatch)) => {
                info!(
                    site_config_id = task.site_config_id,
                    task_id = %dispatch.task_id,
                    "Deferred publish resumed"
                );
                return;
            }
            Ok(None) => {}
            Err(e) => warn!(site_config_id = task.site_config_id, error = %e, "Publish resume failed"),
        }

        match self
            .posts
            .drain_pending_posts(task.user_id, task.site_config_id)
            .await
        {
            Ok(Some(batch)) => info!(
                site_config_id = task.site_config_id,
                task_id = %batch.task_id,
                orders = batch.order_ids.len(),
                "Pending posts flushed"
            ),
            Ok(None) => {}
            Err(e) => warn!(site_config_id = task.site_config_id, error = %e, "Post drain failed"),
        }
    }

    async fn on_succeeded(&self, task: &PipelineTask) -> Result<()> {
        match task.kind() {
            TaskKind::Post => {
                self.posts.on_post_task_finished(&task.id).await?;
            }
            TaskKind::DeploySite => {
                self.sites.on_deploy_finished(&task.id).await?;
            }
            TaskKind::PublishSite => self.sites.on_publish_finished(&task.id).await?,
        }
        Ok(())
    }

    async fn on_failed(&self, task: &PipelineTask, reason: &str) -> Result<()> {
        warn!(task_id = %task.id, kind = %task.kind(), reason, "❌ Task failed");
        match task.kind() {
            TaskKind::Post => {
                self.posts.on_post_task_failed(&task.id, reason).await?;
            }
            TaskKind::DeploySite => self.sites.on_deploy_failed(&task.id, reason).await?,
            TaskKind::PublishSite => self.sites.on_publish_failed(&task.id, reason).await?,
        }
        Ok(())
    }

    /// Consume the event bus until it closes or [`shutdown`](Self::shutdown)
    pub fn spawn(&self, mut receiver: broadcast::Receiver<PublishedEvent>) -> JoinHandle<()> {
        let handler = self.clone();
        tokio::spawn(async move {
            info!("🎧 Pipeline event handler started");
            loop {
                tokio::select! {
                    received = receiver.recv() => match received {
                        Ok(published) => {
                            if let Err(e) = handler.handle(&published.event).await {
                                error!(
                                    task_id = published.event.task_id(),
                                    event = published.event.name(),
                                    error = %e,
                                    "Failed to handle pipeline event"
                                );
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(count)) => {
                            warn!(lagged_count = count, "Event handler lagged behind - some events may have been missed");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("Event channel closed - stopping event handler");
                            break;
                        }
                    },
                    _ = handler.shutdown.notified() => {
                        info!("Pipeline event handler shutting down");
                        break;
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}
