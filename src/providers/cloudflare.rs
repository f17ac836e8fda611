use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::{DnsProvider, DnsProviderType, DnsRecord};
use crate::error::{PipelineError, Result};

const DEFAULT_API_BASE: &str = "https://api.cloudflare.com/client/v4";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ExistingRecord {
    id: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct RecordBody<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: &'a str,
    content: &'a str,
    ttl: u32,
    proxied: bool,
}

/// Cloudflare DNS for the managed site zone
#[derive(Debug, Clone)]
pub struct CloudflareDnsProvider {
    api_base: String,
    zone_id: String,
    api_token: String,
    client: reqwest::Client,
}

impl CloudflareDnsProvider {
    pub fn new(zone_id: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self::with_api_base(DEFAULT_API_BASE, zone_id, api_token)
    }

    pub fn with_api_base(
        api_base: impl Into<String>,
        zone_id: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_base: api_base.into(),
            zone_id: zone_id.into(),
            api_token: api_token.into(),
            client,
        }
    }

    fn records_url(&self) -> String {
        format!(
            "{}/zones/{}/dns_records",
            self.api_base.trim_end_matches('/'),
            self.zone_id
        )
    }

    async fn find_record(&self, record: &DnsRecord) -> Result<Option<ExistingRecord>> {
        let response = self
            .client
            .get(self.records_url())
            .bearer_auth(&self.api_token)
            .query(&[("type", record.record_type.as_str()), ("name", record.name.as_str())])
            .send()
            .await?;
        let envelope: Envelope<Vec<ExistingRecord>> = Self::read(response).await?;
        Ok(envelope.result.unwrap_or_default().into_iter().next())
    }

    async fn read<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<Envelope<T>> {
        let status = response.status();
        let envelope: Envelope<T> = response.json().await.map_err(|e| {
            PipelineError::provider(format!("invalid Cloudflare response ({status}): {e}"))
        })?;
        if !status.is_success() || !envelope.success {
            return Err(PipelineError::provider(format!(
                "Cloudflare request failed ({status}): {:?}",
                envelope.errors
            )));
        }
        Ok(envelope)
    }
}

#[async_trait]
impl DnsProvider for CloudflareDnsProvider {
    fn provider_type(&self) -> DnsProviderType {
        DnsProviderType::Cloudflare
    }

    async fn update_dns_record(&self, record: &DnsRecord) -> Result<()> {
        let body = RecordBody {
            record_type: &record.record_type,
            name: &record.name,
            content: &record.content,
            ttl: 1,
            proxied: false,
        };

        match self.find_record(record).await? {
            Some(existing) if existing.content == record.content => {
                debug!(name = %record.name, "DNS record already up to date");
            }
            Some(existing) => {
                let response = self
                    .client
                    .patch(format!("{}/{}", self.records_url(), existing.id))
                    .bearer_auth(&self.api_token)
                    .json(&body)
                    .send()
                    .await?;
                Self::read::<serde_json::Value>(response).await?;
                info!(name = %record.name, content = %record.content, "🌐 DNS record updated");
            }
            None => {
                let response = self
                    .client
                    .post(self.records_url())
                    .bearer_auth(&self.api_token)
                    .json(&body)
                    .send()
                    .await?;
                Self::read::<serde_json::Value>(response).await?;
                info!(name = %record.name, content = %record.content, "🌐 DNS record created");
            }
        }
        Ok(())
    }
}
