use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

use crate::constants::task_prefixes;
use crate::state_machine::OrderTaskState;

/// Worker method a task runs; also decides which orders the task owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskMethod {
    CreatePosts,
    UpdatePosts,
    DeletePosts,
    DeploySite,
    PublishSite,
}

impl TaskMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreatePosts => "CREATE_POSTS",
            Self::UpdatePosts => "UPDATE_POSTS",
            Self::DeletePosts => "DELETE_POSTS",
            Self::DeploySite => "DEPLOY_SITE",
            Self::PublishSite => "PUBLISH_SITE",
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            Self::CreatePosts | Self::UpdatePosts | Self::DeletePosts => TaskKind::Post,
            Self::DeploySite => TaskKind::DeploySite,
            Self::PublishSite => TaskKind::PublishSite,
        }
    }

    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::CreatePosts => task_prefixes::CREATE_POSTS,
            Self::UpdatePosts => task_prefixes::UPDATE_POSTS,
            Self::DeletePosts => task_prefixes::DELETE_POSTS,
            Self::DeploySite => task_prefixes::DEPLOY_SITE,
            Self::PublishSite => task_prefixes::PUBLISH_SITE,
        }
    }

    /// Generate a fresh, globally unique task id for this method
    pub fn generate_task_id(&self) -> String {
        format!("{}{}", self.id_prefix(), Uuid::new_v4())
    }
}

impl fmt::Display for TaskMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE_POSTS" => Ok(Self::CreatePosts),
            "UPDATE_POSTS" => Ok(Self::UpdatePosts),
            "DELETE_POSTS" => Ok(Self::DeletePosts),
            "DEPLOY_SITE" => Ok(Self::DeploySite),
            "PUBLISH_SITE" => Ok(Self::PublishSite),
            _ => Err(format!("Invalid task method: {s}")),
        }
    }
}

impl_text_column!(TaskMethod);

/// Task family: PostTask, DeploySiteTask or PublishSiteTask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    Post,
    DeploySite,
    PublishSite,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Post => write!(f, "post"),
            Self::DeploySite => write!(f, "deploy_site"),
            Self::PublishSite => write!(f, "publish_site"),
        }
    }
}

/// Batch of orders handed to one worker invocation chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PipelineTask {
    pub id: String,
    pub method: TaskMethod,
    pub user_id: i64,
    pub site_config_id: i64,
    pub state: OrderTaskState,
    pub worker_name: String,
    #[serde(skip_serializing)]
    pub worker_secret: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineTask {
    pub fn new(method: TaskMethod, user_id: i64, site_config_id: i64) -> Self {
        let now = Utc::now();
        Self {
            id: method.generate_task_id(),
            method,
            user_id,
            site_config_id,
            state: OrderTaskState::Pending,
            worker_name: String::new(),
            worker_secret: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.method.kind()
    }
}

/// Exclusive git workspace granted to one in-flight task of a site config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskWorkspace {
    pub site_config_id: i64,
    pub task_id: String,
    pub workspace: String,
}

impl TaskWorkspace {
    pub fn new(user_id: i64, site_config_id: i64, task_id: impl Into<String>) -> Self {
        Self {
            site_config_id,
            task_id: task_id.into(),
            workspace: format!("{user_id}/{site_config_id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_prefixes() {
        let task = PipelineTask::new(TaskMethod::CreatePosts, 1, 2);
        assert!(task.id.starts_with("wt4site-create-posts-"));
        assert_eq!(task.kind(), TaskKind::Post);
        assert_eq!(task.state, OrderTaskState::Pending);

        let other = PipelineTask::new(TaskMethod::CreatePosts, 1, 2);
        assert_ne!(task.id, other.id);
    }

    #[test]
    fn test_method_kinds() {
        assert_eq!(TaskMethod::DeletePosts.kind(), TaskKind::Post);
        assert_eq!(TaskMethod::DeploySite.kind(), TaskKind::DeploySite);
        assert_eq!(TaskMethod::PublishSite.kind(), TaskKind::PublishSite);
        assert!(TaskMethod::PublishSite
            .generate_task_id()
            .starts_with("wt4site-publish-site-"));
    }

    #[test]
    fn test_worker_secret_not_serialized() {
        let mut task = PipelineTask::new(TaskMethod::DeploySite, 1, 2);
        task.worker_secret = "s3cr3t".into();
        let json = serde_json::to_string(&task).unwrap();
        assert!(!json.contains("s3cr3t"));
    }
}
