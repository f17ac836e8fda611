use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

use crate::models::TaskMethod;
use crate::state_machine::OrderTaskState;
use crate::storage::MetadataStorageType;

/// What the worker should do with a post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostAction {
    Create,
    Update,
    Delete,
}

impl PostAction {
    pub const ALL: [PostAction; 3] = [Self::Create, Self::Update, Self::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    pub fn task_method(&self) -> TaskMethod {
        match self {
            Self::Create => TaskMethod::CreatePosts,
            Self::Update => TaskMethod::UpdatePosts,
            Self::Delete => TaskMethod::DeletePosts,
        }
    }
}

impl fmt::Display for PostAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PostAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(Self::Create),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            _ => Err(format!("Invalid post action: {s}")),
        }
    }
}

impl_text_column!(PostAction);

/// The author-controlled fields of a post
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PostContent {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub cover: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub license: String,
}

/// Immutable content snapshot, keyed like the order that references it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PostMetadata {
    pub id: String,
    pub user_id: i64,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub content: PostContent,
    pub is_draft: bool,
    pub created_at: DateTime<Utc>,
}

impl PostMetadata {
    pub fn new(id: impl Into<String>, user_id: i64, content: PostContent, is_draft: bool) -> Self {
        Self {
            id: id.into(),
            user_id,
            content,
            is_draft,
            created_at: Utc::now(),
        }
    }
}

/// One post publication intent.
///
/// `submit_state` tracks the repository write (create/update/delete the post
/// file), `publish_state` tracks the site publish that makes it visible and
/// `certificate_state` tracks optional notarization. The three flags are
/// independent state machines sharing the record. Empty strings mean "unset"
/// for the task/order cross references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PostOrder {
    pub id: String,
    pub user_id: i64,
    pub site_config_id: i64,
    pub action: PostAction,
    pub submit_state: OrderTaskState,
    pub publish_state: OrderTaskState,
    pub certificate_state: OrderTaskState,
    pub server_verification_id: String,
    pub certificate_id: Option<String>,
    pub certificate_storage_type: Option<MetadataStorageType>,
    pub post_task_id: String,
    pub publish_site_order_id: String,
    pub publish_site_task_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PostOrder {
    /// Intake state: `submit_state = PENDING`, everything else untouched
    pub fn new(
        id: impl Into<String>,
        user_id: i64,
        site_config_id: i64,
        action: PostAction,
        server_verification_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id,
            site_config_id,
            action,
            submit_state: OrderTaskState::Pending,
            publish_state: OrderTaskState::None,
            certificate_state: OrderTaskState::None,
            server_verification_id: server_verification_id.into(),
            certificate_id: None,
            certificate_storage_type: None,
            post_task_id: String::new(),
            publish_site_order_id: String::new(),
            publish_site_task_id: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the order is still waiting to be claimed by a post task
    pub fn is_claimable(&self) -> bool {
        self.submit_state == OrderTaskState::Pending && self.post_task_id.is_empty()
    }

    pub fn is_verified(&self) -> bool {
        !self.server_verification_id.is_empty()
    }
}
