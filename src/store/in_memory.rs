//! # In-Memory Pipeline Store
//!
//! Process-local implementation of every store trait, used by tests and by the
//! server when no database is configured. Orders and tasks live behind a single
//! mutex so claims, cascades and the workspace lock are atomic; worker jobs and
//! verifications are independent lookups kept in `DashMap`s.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

use super::{PostOrderStore, SiteOrderStore, TaskStore, VerificationStore, WorkerJobStore};
use crate::error::{PipelineError, Result};
use crate::models::{
    DeploySiteOrder, OrderTaskState, PageRequest, Pagination, PipelineTask, PostAction,
    PostMetadata, PostOrder, PublishSiteOrder, ServerVerificationEntity, TaskWorkspace, WorkerJob,
    WorkerJobState,
};
use crate::storage::MetadataStorageType;

#[derive(Debug, Default)]
struct Tables {
    post_metadata: HashMap<String, PostMetadata>,
    /// Insertion order doubles as the newest-first tiebreaker
    post_orders: Vec<PostOrder>,
    deploy_site_orders: HashMap<String, DeploySiteOrder>,
    publish_site_orders: HashMap<String, PublishSiteOrder>,
    tasks: Vec<PipelineTask>,
}

impl Tables {
    fn post_orders_where<'a>(
        &'a mut self,
        predicate: impl Fn(&PostOrder) -> bool + 'a,
    ) -> impl Iterator<Item = &'a mut PostOrder> + 'a {
        self.post_orders.iter_mut().filter(move |o| predicate(o))
    }
}

/// Pipeline store backed by process memory
#[derive(Debug, Default)]
pub struct InMemoryPipelineStore {
    tables: Mutex<Tables>,
    worker_jobs: DashMap<String, WorkerJob>,
    /// Worker names in save order
    worker_job_order: Mutex<Vec<String>>,
    verifications: DashMap<String, ServerVerificationEntity>,
}

impl InMemoryPipelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all tasks, oldest first
    pub fn tasks(&self) -> Vec<PipelineTask> {
        self.tables.lock().tasks.clone()
    }
}

#[async_trait]
impl PostOrderStore for InMemoryPipelineStore {
    async fn save_post_metadata(&self, metadata: &PostMetadata) -> Result<()> {
        self.tables
            .lock()
            .post_metadata
            .entry(metadata.id.clone())
            .or_insert_with(|| metadata.clone());
        Ok(())
    }

    async fn get_post_metadata(&self, id: &str) -> Result<Option<PostMetadata>> {
        Ok(self.tables.lock().post_metadata.get(id).cloned())
    }

    async fn save_post_order(&self, order: &PostOrder) -> Result<()> {
        let mut tables = self.tables.lock();
        if !tables.post_orders.iter().any(|o| o.id == order.id) {
            tables.post_orders.push(order.clone());
        }
        Ok(())
    }

    async fn get_post_order(&self, id: &str) -> Result<Option<PostOrder>> {
        Ok(self
            .tables
            .lock()
            .post_orders
            .iter()
            .find(|o| o.id == id)
            .cloned())
    }

    async fn list_post_orders_for_task(&self, post_task_id: &str) -> Result<Vec<PostOrder>> {
        Ok(self
            .tables
            .lock()
            .post_orders
            .iter()
            .filter(|o| o.post_task_id == post_task_id)
            .cloned()
            .collect())
    }

    async fn page_post_orders(
        &self,
        user_id: i64,
        site_config_id: Option<i64>,
        page: PageRequest,
    ) -> Result<Pagination<PostOrder>> {
        let page = page.normalized();
        let mut matching: Vec<PostOrder> = self
            .tables
            .lock()
            .post_orders
            .iter()
            .rev()
            .filter(|o| o.user_id == user_id)
            .filter(|o| site_config_id.map_or(true, |site| o.site_config_id == site))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit as usize)
            .collect();
        Ok(Pagination::new(items, total, page))
    }

    async fn count_pending_post_orders(
        &self,
        user_id: i64,
        site_config_id: i64,
        action: PostAction,
    ) -> Result<u64> {
        Ok(self
            .tables
            .lock()
            .post_orders
            .iter()
            .filter(|o| {
                o.user_id == user_id
                    && o.site_config_id == site_config_id
                    && o.action == action
                    && o.is_claimable()
            })
            .count() as u64)
    }

    async fn claim_pending_post_orders(
        &self,
        user_id: i64,
        site_config_id: i64,
        action: PostAction,
        post_task_id: &str,
    ) -> Result<Vec<PostOrder>> {
        let now = Utc::now();
        let mut tables = self.tables.lock();
        let claimed: Vec<PostOrder> = tables
            .post_orders_where(move |o| {
                o.user_id == user_id
                    && o.site_config_id == site_config_id
                    && o.action == action
                    && o.is_claimable()
            })
            .map(|order| {
                order.post_task_id = post_task_id.to_string();
                order.updated_at = now;
                order.clone()
            })
            .collect();
        debug!(post_task_id, claimed = claimed.len(), "Claimed pending post orders");
        Ok(claimed)
    }

    async fn update_post_orders_submit_state(
        &self,
        post_task_id: &str,
        from: OrderTaskState,
        to: OrderTaskState,
    ) -> Result<u64> {
        let now = Utc::now();
        let mut tables = self.tables.lock();
        let mut moved = 0;
        for order in tables
            .post_orders_where(|o| o.post_task_id == post_task_id && o.submit_state == from)
        {
            order.submit_state = to;
            order.updated_at = now;
            moved += 1;
        }
        Ok(moved)
    }

    async fn finish_post_orders_for_publish(
        &self,
        post_task_id: &str,
        publish_site_order_id: &str,
    ) -> Result<u64> {
        let now = Utc::now();
        let mut tables = self.tables.lock();
        let mut moved = 0;
        for order in tables.post_orders_where(|o| {
            o.post_task_id == post_task_id && o.submit_state == OrderTaskState::Doing
        }) {
            order.submit_state = OrderTaskState::Finished;
            if order.publish_state == OrderTaskState::None {
                order.publish_state = OrderTaskState::Pending;
                order.publish_site_order_id = publish_site_order_id.to_string();
            }
            order.updated_at = now;
            moved += 1;
        }
        Ok(moved)
    }

    async fn claim_post_orders_for_publish(
        &self,
        user_id: i64,
        site_config_id: i64,
        publish_site_order_id: &str,
        publish_site_task_id: &str,
    ) -> Result<u64> {
        let now = Utc::now();
        let mut tables = self.tables.lock();
        let mut claimed = 0;
        for order in tables.post_orders_where(|o| {
            o.user_id == user_id
                && o.site_config_id == site_config_id
                && o.publish_state == OrderTaskState::Pending
                && o.publish_site_task_id.is_empty()
        }) {
            order.publish_site_order_id = publish_site_order_id.to_string();
            order.publish_site_task_id = publish_site_task_id.to_string();
            order.updated_at = now;
            claimed += 1;
        }
        Ok(claimed)
    }

    async fn update_post_orders_publish_state(
        &self,
        publish_site_task_id: &str,
        from: OrderTaskState,
        to: OrderTaskState,
    ) -> Result<u64> {
        let now = Utc::now();
        let mut tables = self.tables.lock();
        let mut moved = 0;
        for order in tables.post_orders_where(|o| {
            o.publish_site_task_id == publish_site_task_id && o.publish_state == from
        }) {
            order.publish_state = to;
            order.updated_at = now;
            moved += 1;
        }
        Ok(moved)
    }

    async fn update_post_order_certificate(
        &self,
        id: &str,
        from: OrderTaskState,
        to: OrderTaskState,
        certificate: Option<(String, MetadataStorageType)>,
    ) -> Result<bool> {
        let mut tables = self.tables.lock();
        let Some(order) = tables
            .post_orders
            .iter_mut()
            .find(|o| o.id == id && o.certificate_state == from)
        else {
            return Ok(false);
        };
        order.certificate_state = to;
        if let Some((certificate_id, storage_type)) = certificate {
            order.certificate_id = Some(certificate_id);
            order.certificate_storage_type = Some(storage_type);
        }
        order.updated_at = Utc::now();
        Ok(true)
    }
}

#[async_trait]
impl SiteOrderStore for InMemoryPipelineStore {
    async fn save_deploy_site_order(&self, order: &DeploySiteOrder) -> Result<()> {
        self.tables
            .lock()
            .deploy_site_orders
            .entry(order.id.clone())
            .or_insert_with(|| order.clone());
        Ok(())
    }

    async fn get_deploy_site_order(&self, id: &str) -> Result<Option<DeploySiteOrder>> {
        Ok(self.tables.lock().deploy_site_orders.get(id).cloned())
    }

    async fn link_deploy_site_order(&self, id: &str, deploy_site_task_id: &str) -> Result<bool> {
        let mut tables = self.tables.lock();
        match tables.deploy_site_orders.get_mut(id) {
            Some(order)
                if order.submit_state == OrderTaskState::Pending
                    && order.deploy_site_task_id.is_empty() =>
            {
                order.deploy_site_task_id = deploy_site_task_id.to_string();
                order.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_deploy_site_orders_state(
        &self,
        deploy_site_task_id: &str,
        from: OrderTaskState,
        to: OrderTaskState,
    ) -> Result<u64> {
        let now = Utc::now();
        let mut moved = 0;
        for order in self.tables.lock().deploy_site_orders.values_mut() {
            if order.deploy_site_task_id == deploy_site_task_id && order.submit_state == from {
                order.submit_state = to;
                order.updated_at = now;
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn save_publish_site_order(&self, order: &PublishSiteOrder) -> Result<()> {
        self.tables
            .lock()
            .publish_site_orders
            .entry(order.id.clone())
            .or_insert_with(|| order.clone());
        Ok(())
    }

    async fn get_publish_site_order(&self, id: &str) -> Result<Option<PublishSiteOrder>> {
        Ok(self.tables.lock().publish_site_orders.get(id).cloned())
    }

    async fn find_pending_publish_site_order(
        &self,
        site_config_id: i64,
    ) -> Result<Option<PublishSiteOrder>> {
        Ok(self
            .tables
            .lock()
            .publish_site_orders
            .values()
            .filter(|o| {
                o.site_config_id == site_config_id
                    && o.submit_state == OrderTaskState::Pending
                    && o.publish_site_task_id.is_empty()
            })
            .min_by_key(|o| o.created_at)
            .cloned())
    }

    async fn link_publish_site_order(
        &self,
        id: &str,
        publish_site_task_id: &str,
    ) -> Result<bool> {
        let mut tables = self.tables.lock();
        match tables.publish_site_orders.get_mut(id) {
            Some(order)
                if order.submit_state == OrderTaskState::Pending
                    && order.publish_site_task_id.is_empty() =>
            {
                order.publish_site_task_id = publish_site_task_id.to_string();
                order.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_publish_site_orders_state(
        &self,
        publish_site_task_id: &str,
        from: OrderTaskState,
        to: OrderTaskState,
    ) -> Result<u64> {
        let now = Utc::now();
        let mut moved = 0;
        for order in self.tables.lock().publish_site_orders.values_mut() {
            if order.publish_site_task_id == publish_site_task_id && order.submit_state == from {
                order.submit_state = to;
                order.updated_at = now;
                moved += 1;
            }
        }
        Ok(moved)
    }
}

#[async_trait]
impl TaskStore for InMemoryPipelineStore {
    async fn create_task(&self, task: &PipelineTask) -> Result<TaskWorkspace> {
        let mut tables = self.tables.lock();
        if let Some(holder) = tables
            .tasks
            .iter()
            .find(|t| t.site_config_id == task.site_config_id && t.state.is_open())
        {
            return Err(PipelineError::WorkspaceLocked {
                site_config_id: task.site_config_id,
                task_id: holder.id.clone(),
            });
        }
        if tables.tasks.iter().any(|t| t.id == task.id) {
            return Err(PipelineError::validation(format!(
                "Task {} already exists",
                task.id
            )));
        }
        tables.tasks.push(task.clone());
        Ok(TaskWorkspace::new(task.user_id, task.site_config_id, &task.id))
    }

    async fn get_task(&self, id: &str) -> Result<Option<PipelineTask>> {
        Ok(self.tables.lock().tasks.iter().find(|t| t.id == id).cloned())
    }

    async fn find_active_site_task(&self, site_config_id: i64) -> Result<Option<PipelineTask>> {
        Ok(self
            .tables
            .lock()
            .tasks
            .iter()
            .find(|t| t.site_config_id == site_config_id && t.state.is_open())
            .cloned())
    }

    async fn transition_task_state(
        &self,
        id: &str,
        from: OrderTaskState,
        to: OrderTaskState,
    ) -> Result<bool> {
        let mut tables = self.tables.lock();
        match tables.tasks.iter_mut().find(|t| t.id == id && t.state == from) {
            Some(task) => {
                task.state = to;
                task.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn assign_task_worker(
        &self,
        id: &str,
        worker_name: &str,
        worker_secret: &str,
    ) -> Result<()> {
        let mut tables = self.tables.lock();
        let task = tables
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| PipelineError::not_found(format!("Task {id} not found")))?;
        task.worker_name = worker_name.to_string();
        task.worker_secret = worker_secret.to_string();
        task.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl VerificationStore for InMemoryPipelineStore {
    async fn save_server_verification(&self, entity: &ServerVerificationEntity) -> Result<bool> {
        match self.verifications.entry(entity.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(entity.clone());
                Ok(true)
            }
        }
    }

    async fn get_server_verification(
        &self,
        id: &str,
    ) -> Result<Option<ServerVerificationEntity>> {
        Ok(self.verifications.get(id).map(|entry| entry.value().clone()))
    }
}

#[async_trait]
impl WorkerJobStore for InMemoryPipelineStore {
    async fn save_worker_job(&self, job: &WorkerJob) -> Result<()> {
        if self
            .worker_jobs
            .insert(job.worker_name.clone(), job.clone())
            .is_none()
        {
            self.worker_job_order.lock().push(job.worker_name.clone());
        }
        Ok(())
    }

    async fn get_worker_job(&self, worker_name: &str) -> Result<Option<WorkerJob>> {
        Ok(self
            .worker_jobs
            .get(worker_name)
            .map(|entry| entry.value().clone()))
    }

    async fn update_worker_job_state(
        &self,
        worker_name: &str,
        state: WorkerJobState,
    ) -> Result<bool> {
        match self.worker_jobs.get_mut(worker_name) {
            Some(mut job) => {
                job.state = state;
                job.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_worker_health_check(
        &self,
        worker_name: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        match self.worker_jobs.get_mut(worker_name) {
            Some(mut job) => {
                job.last_health_check_at = Some(at);
                job.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_worker_jobs(&self, task_id: &str) -> Result<Vec<WorkerJob>> {
        let order = self.worker_job_order.lock().clone();
        Ok(order
            .iter()
            .filter_map(|name| self.worker_jobs.get(name))
            .filter(|entry| entry.task_id == task_id)
            .map(|entry| entry.value().clone())
            .collect())
    }
}
