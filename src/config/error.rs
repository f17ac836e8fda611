use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

impl ConfigurationError {
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;

impl From<ConfigurationError> for crate::error::PipelineError {
    fn from(err: ConfigurationError) -> Self {
        Self::Configuration(err.to_string())
    }
}
