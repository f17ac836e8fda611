use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;

use super::{MetadataStorageProvider, MetadataStorageType};
use crate::error::{PipelineError, Result};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

/// IPFS backend: uploads through the node HTTP API (`/api/v0/add`), reads
/// through a gateway (`/ipfs/<cid>`). References are CIDs.
#[derive(Debug, Clone)]
pub struct IpfsStorageProvider {
    api_url: String,
    gateway_url: String,
    client: reqwest::Client,
}

impl IpfsStorageProvider {
    pub fn new(api_url: impl Into<String>, gateway_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_url: api_url.into(),
            gateway_url: gateway_url.into(),
            client,
        }
    }

    fn add_url(&self) -> String {
        format!(
            "{}/api/v0/add?pin=true&cid-version=1",
            self.api_url.trim_end_matches('/')
        )
    }

    fn content_url(&self, cid: &str) -> String {
        format!("{}/ipfs/{cid}", self.gateway_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl MetadataStorageProvider for IpfsStorageProvider {
    fn storage_type(&self) -> MetadataStorageType {
        MetadataStorageType::Ipfs
    }

    async fn get(&self, reference: &str) -> Result<String> {
        let response = self
            .client
            .get(self.content_url(reference))
            .send()
            .await
            .map_err(|e| PipelineError::storage(format!("IPFS fetch failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::storage(format!(
                "IPFS fetch of {reference} failed ({status})"
            )));
        }
        response
            .text()
            .await
            .map_err(|e| PipelineError::storage(format!("IPFS body read failed: {e}")))
    }

    async fn upload(&self, content_key: &str, content: &str) -> Result<String> {
        let part = Part::text(content.to_string()).file_name(content_key.to_string());
        let form = Form::new().part("file", part);
        let response = self
            .client
            .post(self.add_url())
            .multipart(form)
            .send()
            .await
            .map_err(|e| PipelineError::storage(format!("IPFS upload failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::storage(format!(
                "IPFS upload of {content_key} failed ({status})"
            )));
        }
        let added: AddResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::storage(format!("invalid IPFS add response: {e}")))?;
        Ok(added.hash)
    }
}
