use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{MetadataStorageProvider, MetadataStorageType};
use crate::error::{PipelineError, Result};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadRequest<'a> {
    content_key: &'a str,
    content: &'a str,
    content_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: String,
}

/// Arweave backend: uploads go through a bundling upload service that pays for
/// and posts the transaction, reads go to a gateway (`/<tx id>`). References
/// are transaction ids.
#[derive(Debug, Clone)]
pub struct ArweaveStorageProvider {
    upload_url: String,
    gateway_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl ArweaveStorageProvider {
    pub fn new(
        upload_url: impl Into<String>,
        gateway_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            upload_url: upload_url.into(),
            gateway_url: gateway_url.into(),
            api_key,
            client,
        }
    }

    fn content_url(&self, id: &str) -> String {
        format!("{}/{id}", self.gateway_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl MetadataStorageProvider for ArweaveStorageProvider {
    fn storage_type(&self) -> MetadataStorageType {
        MetadataStorageType::Arweave
    }

    async fn get(&self, reference: &str) -> Result<String> {
        let response = self
            .client
            .get(self.content_url(reference))
            .send()
            .await
            .map_err(|e| PipelineError::storage(format!("Arweave fetch failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::storage(format!(
                "Arweave fetch of {reference} failed ({status})"
            )));
        }
        response
            .text()
            .await
            .map_err(|e| PipelineError::storage(format!("Arweave body read failed: {e}")))
    }

    async fn upload(&self, content_key: &str, content: &str) -> Result<String> {
        let mut request = self.client.post(&self.upload_url).json(&UploadRequest {
            content_key,
            content,
            content_type: "application/json",
        });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::storage(format!("Arweave upload failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::storage(format!(
                "Arweave upload of {content_key} failed ({status})"
            )));
        }
        let uploaded: UploadResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::storage(format!("invalid Arweave upload response: {e}")))?;
        Ok(uploaded.id)
    }
}
