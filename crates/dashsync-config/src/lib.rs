mod defaults;
mod env;
pub mod types;
mod validation;

use std::path::Path;

pub use defaults::derive_endpoint_name;
pub use env::interpolate_env;
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

    #[error("Duplicate channel name: {0}")]
    DuplicateChannel(String),

    #[error("Duplicate snapshot endpoint name: {0}")]
    DuplicateEndpoint(String),

    #[error("Invalid endpoint path '{0}': {1}")]
    InvalidEndpointPath(String, String),

    #[error("View-model key '{0}' is written by both '{1}' and '{2}'")]
    OverlappingSnapshotKeys(String, String, String),

    #[error("Frame type '{0}' is listed in both merge.{1} and merge.{2}")]
    AmbiguousFrameType(String, String, String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DashboardConfig {
    /// Parse a dashboard configuration from a YAML string.
    /// Environment variables in the format `${VAR_NAME}` or `${VAR_NAME:-default}` are interpolated.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let interpolated = env::interpolate_env(yaml)?;
        let config: DashboardConfig = serde_yaml::from_str(&interpolated)?;
        Ok(config)
    }

    /// Load a dashboard configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Look up a configured channel by name.
    pub fn channel(&self, name: &str) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.name == name)
    }
}
