//! # Provider Registry
//!
//! Capability traits for the external backends the pipeline drives (DNS, git
//! storage, git publishing, metadata storage), one struct per concrete backend,
//! and the [`ProviderRegistry`] that maps a provider type to its implementation.
//! The registry is built once at startup and injected into every consumer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::models::{impl_text_column, GitRepoSetting, SiteInfo};

pub mod cloudflare;
pub mod git;
pub mod registry;

pub use cloudflare::CloudflareDnsProvider;
pub use git::{GiteeProvider, GithubProvider};
pub use registry::{ProviderRegistry, ProviderRegistryBuilder};

/// Hosting service of a git repository or pages site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GitProviderType {
    Github,
    Gitee,
}

impl GitProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Github => "GITHUB",
            Self::Gitee => "GITEE",
        }
    }
}

impl fmt::Display for GitProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GitProviderType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "GITHUB" => Ok(Self::Github),
            "GITEE" => Ok(Self::Gitee),
            _ => Err(format!("Invalid git provider type: {s}")),
        }
    }
}

impl_text_column!(GitProviderType);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DnsProviderType {
    Cloudflare,
}

impl fmt::Display for DnsProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cloudflare => f.write_str("CLOUDFLARE"),
        }
    }
}

/// DNS record to upsert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String,
    pub content: String,
}

impl DnsRecord {
    pub fn cname(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            record_type: "CNAME".to_string(),
            name: name.into(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait DnsProvider: Send + Sync {
    fn provider_type(&self) -> DnsProviderType;

    /// Upsert a record: patch the existing record with the same type and name,
    /// create one otherwise.
    async fn update_dns_record(&self, record: &DnsRecord) -> Result<()>;
}

/// Git credentials and coordinates handed to the worker for a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitInfo {
    pub git_type: GitProviderType,
    pub git_token: String,
    pub git_username: String,
    pub git_reponame: String,
    pub git_branch_name: String,
    pub git_commit_name: String,
    pub git_commit_email: String,
}

/// Where and how the generated site gets published
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishInfo {
    pub publisher_type: GitProviderType,
    pub git_username: String,
    pub git_reponame: String,
    pub git_branch_name: String,
    pub pages_host: String,
    pub site_url: String,
    pub cname: Option<String>,
}

/// Repository that stores the site sources
pub trait GitStorageProvider: Send + Sync {
    fn provider_type(&self) -> GitProviderType;

    fn generate_git_info(&self, repo: &GitRepoSetting) -> GitInfo;
}

/// Pages service that serves the generated site
pub trait GitPublisherProvider: Send + Sync {
    fn provider_type(&self) -> GitProviderType;

    /// Host name the pages service answers on for this repository owner
    fn pages_host(&self, repo: &GitRepoSetting) -> String;

    fn generate_publish_info(&self, repo: &GitRepoSetting, site_info: &SiteInfo) -> PublishInfo;
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::{Postgres, Type};

    #[test]
    fn test_git_provider_type_binds_as_text() {
        let text = <String as Type<Postgres>>::type_info();
        assert!(<GitProviderType as Type<Postgres>>::compatible(&text));
        assert_eq!("GITEE".parse::<GitProviderType>().unwrap(), GitProviderType::Gitee);
        assert!("GITLAB".parse::<GitProviderType>().is_err());
    }
}
