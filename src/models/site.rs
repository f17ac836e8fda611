use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

use crate::providers::GitProviderType;
use crate::state_machine::OrderTaskState;

/// Deployment status of a site, advanced by the site pipeline.
///
/// `DeployFailed` and `PublishFailed` are set when a worker fails after the
/// dispatch call already returned, so the site never stays parked in an
/// in-progress status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SiteStatus {
    Configured,
    Deploying,
    Deployed,
    DeployFailed,
    Publishing,
    Published,
    PublishFailed,
}

impl SiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configured => "CONFIGURED",
            Self::Deploying => "DEPLOYING",
            Self::Deployed => "DEPLOYED",
            Self::DeployFailed => "DEPLOY_FAILED",
            Self::Publishing => "PUBLISHING",
            Self::Published => "PUBLISHED",
            Self::PublishFailed => "PUBLISH_FAILED",
        }
    }

    /// In-progress statuses set optimistically before dispatch
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Deploying | Self::Publishing)
    }
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SiteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONFIGURED" => Ok(Self::Configured),
            "DEPLOYING" => Ok(Self::Deploying),
            "DEPLOYED" => Ok(Self::Deployed),
            "DEPLOY_FAILED" => Ok(Self::DeployFailed),
            "PUBLISHING" => Ok(Self::Publishing),
            "PUBLISHED" => Ok(Self::Published),
            "PUBLISH_FAILED" => Ok(Self::PublishFailed),
            _ => Err(format!("Invalid site status: {s}")),
        }
    }
}

impl_text_column!(SiteStatus);

/// Static-site generator flavor of a theme template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateType {
    Hexo,
    Hugo,
    Jekyll,
}

impl TemplateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hexo => "HEXO",
            Self::Hugo => "HUGO",
            Self::Jekyll => "JEKYLL",
        }
    }
}

impl fmt::Display for TemplateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TemplateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HEXO" => Ok(Self::Hexo),
            "HUGO" => Ok(Self::Hugo),
            "JEKYLL" => Ok(Self::Jekyll),
            _ => Err(format!("Invalid template type: {s}")),
        }
    }
}

impl_text_column!(TemplateType);

/// Site metadata rendered into the generated site
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteInfo {
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub favicon: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub timezone: String,
    /// Metaspace-managed domain, e.g. `alice.metaspaces.life`
    #[serde(default)]
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeTemplate {
    pub id: i64,
    pub template_name: String,
    pub template_type: TemplateType,
    pub repo_url: String,
    pub branch_name: String,
    #[serde(default)]
    pub theme_name: String,
}

/// Site configuration as resolved by the configuration service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    pub id: i64,
    pub user_id: i64,
    pub site_info: SiteInfo,
    pub template: ThemeTemplate,
    pub storage_type: Option<GitProviderType>,
    pub storage_provider_id: Option<i64>,
    pub publisher_type: Option<GitProviderType>,
    pub publisher_provider_id: Option<i64>,
    pub status: SiteStatus,
}

/// Git repository and credentials backing a storage or publisher provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct GitRepoSetting {
    pub id: i64,
    pub user_id: i64,
    pub provider_type: GitProviderType,
    pub user_name: String,
    pub repo_name: String,
    pub branch_name: String,
    #[serde(default, skip_serializing)]
    pub access_token: String,
    pub is_repo_empty: bool,
    pub custom_domain: Option<String>,
}

/// Per-site deploy intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DeploySiteOrder {
    pub id: String,
    pub user_id: i64,
    pub site_config_id: i64,
    pub submit_state: OrderTaskState,
    pub deploy_site_task_id: String,
    pub server_verification_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeploySiteOrder {
    pub fn new(
        id: impl Into<String>,
        user_id: i64,
        site_config_id: i64,
        server_verification_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id,
            site_config_id,
            submit_state: OrderTaskState::Pending,
            deploy_site_task_id: String::new(),
            server_verification_id: server_verification_id.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-site publish intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PublishSiteOrder {
    pub id: String,
    pub user_id: i64,
    pub site_config_id: i64,
    pub submit_state: OrderTaskState,
    pub publish_site_task_id: String,
    pub server_verification_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PublishSiteOrder {
    pub fn new(
        id: impl Into<String>,
        user_id: i64,
        site_config_id: i64,
        server_verification_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id,
            site_config_id,
            submit_state: OrderTaskState::Pending,
            publish_site_task_id: String::new(),
            server_verification_id: server_verification_id.into(),
            created_at: now,
            updated_at: now,
        }
    }
}
