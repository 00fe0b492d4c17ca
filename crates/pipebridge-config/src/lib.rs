mod defaults;
mod env;
pub mod types;
mod validation;

use std::path::Path;

pub use types::*;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Missing environment variables: {0:?}")]
    MissingEnvVars(Vec<String>),

    #[error("Duplicate pipe path: {0}")]
    DuplicatePipePath(String),

    #[error("Invalid pipe path '{0}': {1}")]
    InvalidPipePath(String, String),

    #[error("Invalid permission mode for '{0}': {1}")]
    InvalidMode(String, String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BridgeConfig {
    /// Parse a bridge configuration from a YAML string.
    /// Environment variables in the format `${VAR_NAME}` are interpolated first.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let interpolated = env::interpolate_env(yaml)?;
        let config: BridgeConfig = serde_yaml::from_str(&interpolated)?;
        Ok(config)
    }

    /// Load a bridge configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }
}
