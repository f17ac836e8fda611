//! Boundary to the site configuration service. Site CRUD lives elsewhere; the
//! pipeline only reads configs and repository settings and moves the site
//! status.

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use crate::error::{PipelineError, Result};
use crate::models::{GitRepoSetting, SiteConfig, SiteInfo, SiteStatus, ThemeTemplate};
use crate::providers::GitProviderType;

#[async_trait]
pub trait SiteConfigSource: Send + Sync {
    /// `DataNotFound` when the config does not exist
    async fn get_site_config(&self, id: i64) -> Result<SiteConfig>;

    async fn get_git_repo_setting(&self, id: i64) -> Result<GitRepoSetting>;

    async fn update_site_status(&self, id: i64, status: SiteStatus) -> Result<()>;

    /// Record that the repository received its first push
    async fn mark_repo_initialized(&self, repo_id: i64) -> Result<()>;
}

/// Repository the site sources are stored in
pub(crate) async fn resolve_storage(
    source: &dyn SiteConfigSource,
    site: &SiteConfig,
) -> Result<(GitProviderType, GitRepoSetting)> {
    match (site.storage_type, site.storage_provider_id) {
        (Some(provider_type), Some(id)) => {
            Ok((provider_type, source.get_git_repo_setting(id).await?))
        }
        _ => Err(PipelineError::not_found(format!(
            "Storage provider is not configured for site config {}",
            site.id
        ))),
    }
}

/// Repository the generated site is published from
pub(crate) async fn resolve_publisher(
    source: &dyn SiteConfigSource,
    site: &SiteConfig,
) -> Result<(GitProviderType, GitRepoSetting)> {
    match (site.publisher_type, site.publisher_provider_id) {
        (Some(provider_type), Some(id)) => {
            Ok((provider_type, source.get_git_repo_setting(id).await?))
        }
        _ => Err(PipelineError::not_found(format!(
            "Publisher provider is not configured for site config {}",
            site.id
        ))),
    }
}

/// Site configs held in memory
#[derive(Debug, Default)]
pub struct InMemorySiteConfigSource {
    sites: DashMap<i64, SiteConfig>,
    repos: DashMap<i64, GitRepoSetting>,
}

impl InMemorySiteConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_site(&self, site: SiteConfig) {
        self.sites.insert(site.id, site);
    }

    pub fn insert_repo(&self, repo: GitRepoSetting) {
        self.repos.insert(repo.id, repo);
    }

    pub fn status(&self, id: i64) -> Option<SiteStatus> {
        self.sites.get(&id).map(|site| site.status)
    }
}

#[async_trait]
impl SiteConfigSource for InMemorySiteConfigSource {
    async fn get_site_config(&self, id: i64) -> Result<SiteConfig> {
        self.sites
            .get(&id)
            .map(|site| site.value().clone())
            .ok_or_else(|| PipelineError::not_found(format!("Site config {id} not found")))
    }

    async fn get_git_repo_setting(&self, id: i64) -> Result<GitRepoSetting> {
        self.repos
            .get(&id)
            .map(|repo| repo.value().clone())
            .ok_or_else(|| PipelineError::not_found(format!("Git repo setting {id} not found")))
    }

    async fn update_site_status(&self, id: i64, status: SiteStatus) -> Result<()> {
        let mut site = self
            .sites
            .get_mut(&id)
            .ok_or_else(|| PipelineError::not_found(format!("Site config {id} not found")))?;
        site.status = status;
        Ok(())
    }

    async fn mark_repo_initialized(&self, repo_id: i64) -> Result<()> {
        if let Some(mut repo) = self.repos.get_mut(&repo_id) {
            repo.is_repo_empty = false;
        }
        Ok(())
    }
}

/// Site configs read from the shared PostgreSQL database
#[derive(Debug, Clone)]
pub struct PgSiteConfigSource {
    pool: PgPool,
}

impl PgSiteConfigSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SiteConfigSource for PgSiteConfigSource {
    async fn get_site_config(&self, id: i64) -> Result<SiteConfig> {
        let row = sqlx::query(
            "SELECT id, user_id, site_info, template, storage_type, storage_provider_id, \
             publisher_type, publisher_provider_id, status \
             FROM site_configs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| PipelineError::not_found(format!("Site config {id} not found")))?;

        let Json(site_info): Json<SiteInfo> = row.try_get("site_info")?;
        let Json(template): Json<ThemeTemplate> = row.try_get("template")?;
        Ok(SiteConfig {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            site_info,
            template,
            storage_type: row.try_get("storage_type")?,
            storage_provider_id: row.try_get("storage_provider_id")?,
            publisher_type: row.try_get("publisher_type")?,
            publisher_provider_id: row.try_get("publisher_provider_id")?,
            status: row.try_get("status")?,
        })
    }

    async fn get_git_repo_setting(&self, id: i64) -> Result<GitRepoSetting> {
        sqlx::query_as::<_, GitRepoSetting>(
            "SELECT id, user_id, provider_type, user_name, repo_name, branch_name, \
             access_token, is_repo_empty, custom_domain \
             FROM git_repo_settings WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| PipelineError::not_found(format!("Git repo setting {id} not found")))
    }

    async fn update_site_status(&self, id: i64, status: SiteStatus) -> Result<()> {
        let result =
            sqlx::query("UPDATE site_configs SET status = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(status)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(PipelineError::not_found(format!("Site config {id} not found")));
        }
        Ok(())
    }

    async fn mark_repo_initialized(&self, repo_id: i64) -> Result<()> {
        sqlx::query("UPDATE git_repo_settings SET is_repo_empty = FALSE WHERE id = $1")
            .bind(repo_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
