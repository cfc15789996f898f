use thiserror::Error;

use crate::infra::config::ConfigError;

#[allow(clippy::enum_variant_names)]
#[derive(Debug, Error)]
pub enum NimbusError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Invalid configuration: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<serde_json::error::Error> for NimbusError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

impl From<String> for NimbusError {
    fn from(e: String) -> Self {
        Self::GenericError(e)
    }
}

impl From<&str> for NimbusError {
    fn from(e: &str) -> Self {
        Self::GenericError(e.to_string())
    }
}
