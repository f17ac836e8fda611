use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Sent once a site publish finishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SitePublishedNotification {
    pub user_id: i64,
    pub site_config_id: i64,
    pub publish_site_task_id: String,
    pub site_url: String,
    pub published_at: DateTime<Utc>,
}

/// External notification of published sites
#[async_trait]
pub trait PublishNotifier: Send + Sync {
    async fn site_published(&self, notification: &SitePublishedNotification) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

#[async_trait]
impl PublishNotifier for NoopNotifier {
    async fn site_published(&self, notification: &SitePublishedNotification) -> Result<()> {
        debug!(site_config_id = notification.site_config_id, "No publish notifier configured");
        Ok(())
    }
}

/// POSTs the notification as JSON
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl PublishNotifier for WebhookNotifier {
    async fn site_published(&self, notification: &SitePublishedNotification) -> Result<()> {
        let response = self.client.post(&self.url).json(notification).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::provider(format!(
                "Publish webhook returned {status}"
            )));
        }
        info!(
            site_config_id = notification.site_config_id,
            site_url = %notification.site_url,
            "📨 Publish notification sent"
        );
        Ok(())
    }
}
