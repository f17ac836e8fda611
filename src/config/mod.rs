//! # Pipeline Configuration
//!
//! Typed configuration for the pipeline server, loaded by [`ConfigManager`]
//! from `config/pipeline.toml`, an optional `config/pipeline.<env>.toml`
//! overlay and `PIPELINE__SECTION__KEY` environment variables.
//!
//! ```rust,no_run
//! use metaspace_pipeline::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let bind_address = &manager.config().web.bind_address;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::constants::system;
use crate::storage::MetadataStorageType;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub provenance: ProvenanceConfig,
    pub queue: QueueConfig,
    pub runner: RunnerConfig,
    pub worker: WorkerConfig,
    pub pipeline: PipelineBehaviorConfig,
    pub providers: ProvidersConfig,
    pub notifier: NotifierConfig,
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        self.web
            .bind_address
            .parse::<SocketAddr>()
            .map_err(|e| ConfigurationError::invalid_value("web.bind_address", e.to_string()))?;

        if self.provenance.server_domain.trim().is_empty() {
            return Err(ConfigurationError::MissingRequired(
                "provenance.server_domain".to_string(),
            ));
        }
        if hex::decode(&self.provenance.server_private_key)
            .map(|bytes| bytes.len() != 32)
            .unwrap_or(true)
        {
            return Err(ConfigurationError::invalid_value(
                "provenance.server_private_key",
                "expected 32 bytes of hex",
            ));
        }

        if self.queue.backend == QueueBackend::Pgmq && self.database.url.is_none() {
            return Err(ConfigurationError::MissingRequired(
                "database.url (required by the pgmq queue backend)".to_string(),
            ));
        }
        if self.queue.queue_name.is_empty() {
            return Err(ConfigurationError::invalid_value(
                "queue.queue_name",
                "must not be empty",
            ));
        }

        if !(0.0..=1.0).contains(&self.runner.mock_failure_rate) {
            return Err(ConfigurationError::invalid_value(
                "runner.mock_failure_rate",
                "must be between 0.0 and 1.0",
            ));
        }
        if self.runner.processor == ProcessorKind::Docker && self.worker.image.is_empty() {
            return Err(ConfigurationError::MissingRequired(
                "worker.image (required by the docker processor)".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Without a URL the server runs on the in-memory store
    pub url: Option<String>,
    pub max_connections: u32,
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            run_migrations: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub bind_address: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvenanceConfig {
    /// Domain named in the server verification claim
    pub server_domain: String,
    /// Hex-encoded Ed25519 secret key
    pub server_private_key: String,
    /// Backend certificates are uploaded to
    pub certificate_storage: Option<MetadataStorageType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    #[default]
    InMemory,
    Pgmq,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    pub queue_name: String,
    pub visibility_timeout_seconds: i32,
    pub poll_interval_ms: u64,
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::InMemory,
            queue_name: system::DEFAULT_QUEUE_NAME.to_string(),
            visibility_timeout_seconds: 3600,
            poll_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorKind {
    Docker,
    #[default]
    Mock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub processor: ProcessorKind,
    /// Probability that a mock job fails
    pub mock_failure_rate: f64,
    pub mock_health_checks: u32,
    pub mock_step_delay_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            processor: ProcessorKind::Mock,
            mock_failure_rate: 0.0,
            mock_health_checks: 2,
            mock_step_delay_ms: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Container image of the worker process
    pub image: String,
    pub docker_binary: String,
    pub network: Option<String>,
    /// Base URL the worker uses to pull its config and report back
    pub backend_url: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            image: String::new(),
            docker_binary: "docker".to_string(),
            network: None,
            backend_url: "http://localhost:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineBehaviorConfig {
    /// Start a publish as soon as a deploy finishes
    pub auto_publish_after_deploy: bool,
}

impl Default for PipelineBehaviorConfig {
    fn default() -> Self {
        Self {
            auto_publish_after_deploy: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub cloudflare: Option<CloudflareConfig>,
    pub ipfs: Option<IpfsConfig>,
    pub arweave: Option<ArweaveConfig>,
    /// Storage types served from process memory (development and tests)
    pub in_memory_storage: Vec<MetadataStorageType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudflareConfig {
    #[serde(default = "default_cloudflare_api_base")]
    pub api_base: String,
    pub zone_id: String,
    pub api_token: String,
}

fn default_cloudflare_api_base() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpfsConfig {
    pub api_url: String,
    pub gateway_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArweaveConfig {
    pub upload_url: String,
    pub gateway_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Receives a POST for every published site
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
}
