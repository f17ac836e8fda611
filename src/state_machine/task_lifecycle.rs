use std::sync::Arc;
use tracing::{debug, warn};

use super::errors::StateMachineError;
use super::events::TaskEvent;
use super::states::OrderTaskState;
use crate::error::{PipelineError, Result};
use crate::logging::log_task_operation;
use crate::models::{PipelineTask, TaskKind};
use crate::store::PipelineStore;

/// Moves tasks through their lifecycle and cascades to the owned orders.
///
/// Each operation is a conditional task update followed by bulk,
/// predicate-guarded order updates chosen by task kind:
///
/// | kind          | orders moved                                          |
/// |---------------|-------------------------------------------------------|
/// | post          | `PostOrder.submit_state` where `post_task_id` matches |
/// | deploy site   | `DeploySiteOrder.submit_state`                        |
/// | publish site  | `PublishSiteOrder.submit_state` and `PostOrder.publish_state` |
#[derive(Clone)]
pub struct TaskLifecycle {
    store: Arc<dyn PipelineStore>,
}

impl std::fmt::Debug for TaskLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskLifecycle").finish_non_exhaustive()
    }
}

impl TaskLifecycle {
    pub fn new(store: Arc<dyn PipelineStore>) -> Self {
        Self { store }
    }

    /// `PENDING -> DOING` for the task and every order it owns
    pub async fn doing_task(&self, task_id: &str) -> Result<PipelineTask> {
        let task = self.transition(task_id, &TaskEvent::Dispatch).await?;
        let moved = match task.kind() {
            TaskKind::Post => {
                self.store
                    .update_post_orders_submit_state(
                        task_id,
                        OrderTaskState::Pending,
                        OrderTaskState::Doing,
                    )
                    .await?
            }
            TaskKind::DeploySite => {
                self.store
                    .update_deploy_site_orders_state(
                        task_id,
                        OrderTaskState::Pending,
                        OrderTaskState::Doing,
                    )
                    .await?
            }
            TaskKind::PublishSite => {
                self.store
                    .update_publish_site_orders_state(
                        task_id,
                        OrderTaskState::Pending,
                        OrderTaskState::Doing,
                    )
                    .await?
                    + self
                        .store
                        .update_post_orders_publish_state(
                            task_id,
                            OrderTaskState::Pending,
                            OrderTaskState::Doing,
                        )
                        .await?
            }
        };
        self.log(&task, "doing", moved, None);
        Ok(task)
    }

    /// `DOING -> FINISHED` for the task and its orders.
    ///
    /// For post tasks `linked_order_id` names the publish site order the
    /// finished posts now wait on; their `publish_state` becomes PENDING.
    pub async fn finish_task(
        &self,
        task_id: &str,
        linked_order_id: Option<&str>,
    ) -> Result<PipelineTask> {
        let task = self.transition(task_id, &TaskEvent::Finish).await?;
        let moved = match (task.kind(), linked_order_id) {
            (TaskKind::Post, Some(publish_site_order_id)) => {
                self.store
                    .finish_post_orders_for_publish(task_id, publish_site_order_id)
                    .await?
            }
            (TaskKind::Post, None) => {
                self.store
                    .update_post_orders_submit_state(
                        task_id,
                        OrderTaskState::Doing,
                        OrderTaskState::Finished,
                    )
                    .await?
            }
            (TaskKind::DeploySite, _) => {
                self.store
                    .update_deploy_site_orders_state(
                        task_id,
                        OrderTaskState::Doing,
                        OrderTaskState::Finished,
                    )
                    .await?
            }
            (TaskKind::PublishSite, _) => {
                self.store
                    .update_publish_site_orders_state(
                        task_id,
                        OrderTaskState::Doing,
                        OrderTaskState::Finished,
                    )
                    .await?
                    + self
                        .store
                        .update_post_orders_publish_state(
                            task_id,
                            OrderTaskState::Doing,
                            OrderTaskState::Finished,
                        )
                        .await?
            }
        };
        self.log(&task, "finished", moved, linked_order_id);
        Ok(task)
    }

    /// `DOING -> FAILED` for the task and its orders. Never retried here.
    pub async fn fail_task(&self, task_id: &str, reason: &str) -> Result<PipelineTask> {
        let task = self
            .transition(task_id, &TaskEvent::fail_with_error(reason))
            .await?;
        let moved = match task.kind() {
            TaskKind::Post => {
                self.store
                    .update_post_orders_submit_state(
                        task_id,
                        OrderTaskState::Doing,
                        OrderTaskState::Failed,
                    )
                    .await?
            }
            TaskKind::DeploySite => {
                self.store
                    .update_deploy_site_orders_state(
                        task_id,
                        OrderTaskState::Doing,
                        OrderTaskState::Failed,
                    )
                    .await?
            }
            TaskKind::PublishSite => {
                self.store
                    .update_publish_site_orders_state(
                        task_id,
                        OrderTaskState::Doing,
                        OrderTaskState::Failed,
                    )
                    .await?
                    + self
                        .store
                        .update_post_orders_publish_state(
                            task_id,
                            OrderTaskState::Doing,
                            OrderTaskState::Failed,
                        )
                        .await?
            }
        };
        warn!(task_id, reason, orders = moved, "❌ Task failed");
        self.log(&task, "failed", moved, Some(reason));
        Ok(task)
    }

    async fn transition(&self, task_id: &str, event: &TaskEvent) -> Result<PipelineTask> {
        let mut task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("Task {task_id} not found")))?;

        let target = task.state.transition(event)?;
        if !self
            .store
            .transition_task_state(task_id, task.state, target)
            .await?
        {
            // Another caller moved the task between read and update
            return Err(StateMachineError::InvalidTransition {
                from: task.state.to_string(),
                event: event.event_type().to_string(),
            }
            .into());
        }

        debug!(task_id, from = %task.state, to = %target, "Task transitioned");
        task.state = target;
        Ok(task)
    }

    fn log(&self, task: &PipelineTask, status: &str, moved: u64, details: Option<&str>) {
        let details = match details {
            Some(details) => format!("orders={moved} {details}"),
            None => format!("orders={moved}"),
        };
        log_task_operation(
            "transition",
            &task.id,
            Some(task.method.as_str()),
            Some(task.site_config_id),
            status,
            Some(&details),
        );
    }
}
