//! # Content-Addressed Storage Gateway
//!
//! Uniform `get`/`upload` over pluggable metadata storage backends. Provenance
//! artifacts (author digests, author signatures, server verifications and
//! certificates) are stored and fetched exclusively through this gateway.
//!
//! References returned by `upload` are opaque: callers never parse them, they
//! only hand them back to `get` on the backend that produced them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::models::impl_text_column;
use crate::providers::ProviderRegistry;

pub mod arweave;
pub mod ipfs;
pub mod memory;

pub use arweave::ArweaveStorageProvider;
pub use ipfs::IpfsStorageProvider;
pub use memory::InMemoryContentStorage;

/// Metadata storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetadataStorageType {
    /// Distributed file network
    Ipfs,
    /// Permanent ledger storage
    Arweave,
}

impl MetadataStorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ipfs => "IPFS",
            Self::Arweave => "ARWEAVE",
        }
    }
}

impl fmt::Display for MetadataStorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetadataStorageType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "IPFS" => Ok(Self::Ipfs),
            "ARWEAVE" => Ok(Self::Arweave),
            _ => Err(format!("Invalid metadata storage type: {s}")),
        }
    }
}

impl_text_column!(MetadataStorageType);

/// One metadata storage backend
#[async_trait]
pub trait MetadataStorageProvider: Send + Sync {
    fn storage_type(&self) -> MetadataStorageType;

    /// Fetch the content stored under `reference`
    async fn get(&self, reference: &str) -> Result<String>;

    /// Store `content`, returning its reference
    async fn upload(&self, content_key: &str, content: &str) -> Result<String>;
}

/// Front door to the registered metadata storage backends
#[derive(Debug, Clone)]
pub struct StorageGateway {
    registry: Arc<ProviderRegistry>,
}

impl StorageGateway {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    pub async fn get(&self, storage_type: MetadataStorageType, reference: &str) -> Result<String> {
        let provider = self.registry.metadata_storage_provider(storage_type)?;
        debug!(%storage_type, reference, "📥 Fetching metadata");
        provider.get(reference).await
    }

    pub async fn upload(
        &self,
        storage_type: MetadataStorageType,
        content_key: &str,
        content: &str,
    ) -> Result<String> {
        let provider = self.registry.metadata_storage_provider(storage_type)?;
        let reference = provider.upload(content_key, content).await?;
        debug!(%storage_type, content_key, reference = %reference, "📤 Uploaded metadata");
        Ok(reference)
    }
}
