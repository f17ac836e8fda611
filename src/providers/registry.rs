use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{
    CloudflareDnsProvider, DnsProvider, DnsProviderType, GitProviderType, GitPublisherProvider,
    GitStorageProvider, GiteeProvider, GithubProvider,
};
use crate::config::ProvidersConfig;
use crate::error::{PipelineError, Result};
use crate::storage::{
    ArweaveStorageProvider, InMemoryContentStorage, IpfsStorageProvider, MetadataStorageProvider,
    MetadataStorageType,
};

/// Provider type -> implementation, per capability
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    dns: HashMap<DnsProviderType, Arc<dyn DnsProvider>>,
    git_storage: HashMap<GitProviderType, Arc<dyn GitStorageProvider>>,
    git_publisher: HashMap<GitProviderType, Arc<dyn GitPublisherProvider>>,
    metadata_storage: HashMap<MetadataStorageType, Arc<dyn MetadataStorageProvider>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("dns", &self.dns.keys().collect::<Vec<_>>())
            .field("git_storage", &self.git_storage.keys().collect::<Vec<_>>())
            .field("git_publisher", &self.git_publisher.keys().collect::<Vec<_>>())
            .field(
                "metadata_storage",
                &self.metadata_storage.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ProviderRegistry {
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    /// Build the registry from configuration. Sections left out of the
    /// configuration register nothing, so lookups for them fail.
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let mut builder = Self::builder()
            .with_git_provider(GitProviderType::Github, Arc::new(GithubProvider))
            .with_git_provider(GitProviderType::Gitee, Arc::new(GiteeProvider));

        if let Some(cloudflare) = &config.cloudflare {
            builder = builder.with_dns(
                DnsProviderType::Cloudflare,
                Arc::new(CloudflareDnsProvider::with_api_base(
                    &cloudflare.api_base,
                    &cloudflare.zone_id,
                    &cloudflare.api_token,
                )),
            );
        }
        if let Some(ipfs) = &config.ipfs {
            builder = builder.with_metadata_storage(Arc::new(IpfsStorageProvider::new(
                &ipfs.api_url,
                &ipfs.gateway_url,
            )));
        }
        if let Some(arweave) = &config.arweave {
            builder = builder.with_metadata_storage(Arc::new(ArweaveStorageProvider::new(
                &arweave.upload_url,
                &arweave.gateway_url,
                arweave.api_key.clone(),
            )));
        }
        for storage_type in &config.in_memory_storage {
            builder = builder.with_metadata_storage(Arc::new(InMemoryContentStorage::new(
                *storage_type,
            )));
        }
        builder.build()
    }

    pub fn dns_provider(&self, provider_type: DnsProviderType) -> Result<Arc<dyn DnsProvider>> {
        self.dns
            .get(&provider_type)
            .cloned()
            .ok_or_else(|| PipelineError::validation("Invalid dns type"))
    }

    pub fn git_storage_provider(
        &self,
        provider_type: GitProviderType,
    ) -> Result<Arc<dyn GitStorageProvider>> {
        self.git_storage
            .get(&provider_type)
            .cloned()
            .ok_or_else(|| PipelineError::validation("Invalid git storage type"))
    }

    pub fn git_publisher_provider(
        &self,
        provider_type: GitProviderType,
    ) -> Result<Arc<dyn GitPublisherProvider>> {
        self.git_publisher
            .get(&provider_type)
            .cloned()
            .ok_or_else(|| PipelineError::validation("Invalid git publisher type"))
    }

    pub fn metadata_storage_provider(
        &self,
        storage_type: MetadataStorageType,
    ) -> Result<Arc<dyn MetadataStorageProvider>> {
        self.metadata_storage
            .get(&storage_type)
            .cloned()
            .ok_or_else(|| PipelineError::validation("Invalid metadata storage type"))
    }
}

#[derive(Default)]
pub struct ProviderRegistryBuilder {
    registry: ProviderRegistry,
}

impl ProviderRegistryBuilder {
    pub fn with_dns(mut self, provider_type: DnsProviderType, provider: Arc<dyn DnsProvider>) -> Self {
        self.registry.dns.insert(provider_type, provider);
        self
    }

    pub fn with_git_storage(
        mut self,
        provider_type: GitProviderType,
        provider: Arc<dyn GitStorageProvider>,
    ) -> Self {
        self.registry.git_storage.insert(provider_type, provider);
        self
    }

    pub fn with_git_publisher(
        mut self,
        provider_type: GitProviderType,
        provider: Arc<dyn GitPublisherProvider>,
    ) -> Self {
        self.registry.git_publisher.insert(provider_type, provider);
        self
    }

    /// Register one backend for both git capabilities
    pub fn with_git_provider<P>(self, provider_type: GitProviderType, provider: Arc<P>) -> Self
    where
        P: GitStorageProvider + GitPublisherProvider + 'static,
    {
        self.with_git_storage(provider_type, provider.clone())
            .with_git_publisher(provider_type, provider)
    }

    /// Registered under the provider's own storage type
    pub fn with_metadata_storage(mut self, provider: Arc<dyn MetadataStorageProvider>) -> Self {
        self.registry
            .metadata_storage
            .insert(provider.storage_type(), provider);
        self
    }

    pub fn build(self) -> ProviderRegistry {
        self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unregistered_lookups_fail_with_validation_error() {
        let registry = ProviderRegistry::builder().build();

        let err = registry.dns_provider(DnsProviderType::Cloudflare).err().unwrap();
        assert_eq!(err.to_string(), "Validation error: Invalid dns type");
        assert!(registry
            .git_publisher_provider(GitProviderType::Gitee)
            .err()
            .unwrap()
            .is_validation());
        assert!(registry
            .metadata_storage_provider(MetadataStorageType::Ipfs)
            .is_err());
    }

    #[test]
    fn test_from_config_registers_configured_backends() {
        let config = ProvidersConfig {
            in_memory_storage: vec![MetadataStorageType::Arweave],
            ..Default::default()
        };
        let registry = ProviderRegistry::from_config(&config);

        assert!(registry.git_storage_provider(GitProviderType::Github).is_ok());
        assert!(registry.git_publisher_provider(GitProviderType::Gitee).is_ok());
        assert!(registry
            .metadata_storage_provider(MetadataStorageType::Arweave)
            .is_ok());
        assert!(registry
            .metadata_storage_provider(MetadataStorageType::Ipfs)
            .is_err());
        assert!(registry.dns_provider(DnsProviderType::Cloudflare).is_err());
    }
}
