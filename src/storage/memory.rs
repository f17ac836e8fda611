use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};

use super::{MetadataStorageProvider, MetadataStorageType};
use crate::error::{PipelineError, Result};

/// SHA-256 content-addressed store kept in process memory.
///
/// Registers under any [`MetadataStorageType`], so tests and local runs can
/// stand in for a real backend.
#[derive(Debug)]
pub struct InMemoryContentStorage {
    storage_type: MetadataStorageType,
    objects: DashMap<String, String>,
}

impl InMemoryContentStorage {
    pub fn new(storage_type: MetadataStorageType) -> Self {
        Self {
            storage_type,
            objects: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl MetadataStorageProvider for InMemoryContentStorage {
    fn storage_type(&self) -> MetadataStorageType {
        self.storage_type
    }

    async fn get(&self, reference: &str) -> Result<String> {
        self.objects
            .get(reference)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| PipelineError::storage(format!("No content stored under {reference}")))
    }

    async fn upload(&self, _content_key: &str, content: &str) -> Result<String> {
        let reference = format!("mem://{}", hex::encode(Sha256::digest(content.as_bytes())));
        self.objects
            .entry(reference.clone())
            .or_insert_with(|| content.to_string());
        Ok(reference)
    }
}
