pub mod fixed;
pub mod local;

use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;
use thiserror::Error;

use crate::infra::provider::fixed::{FixedHostsConfig, FixedHostsProvider};
use crate::infra::provider::local::{LocalProvider, LocalProviderConfig};
use crate::resource::Resource;
use crate::specification::Specification;
use crate::RequestId;

#[derive(Debug, Error)]
pub enum RequestResourceError {
    #[error("No capacity left for {0}")]
    NoCapacity(String),
    #[error("Request was rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("Unknown resource or request {0}")]
    NotFound(String),
    #[error("Infrastructure error: {0}")]
    Generic(String),
}

pub type ProviderResult<T> = Pin<Box<dyn Future<Output = T>>>;

/// Handler that can communicate with an infrastructure that provisions resources.
pub trait InfrastructureProvider {
    /// Asks for a new resource satisfying `spec`.
    ///
    /// Returns an identifier that can be polled with [`InfrastructureProvider::get_resource`].
    fn request_resource(
        &mut self,
        spec: &Specification,
    ) -> ProviderResult<Result<RequestId, RequestResourceError>>;

    /// Returns the resource created for `request_id`, or `None` if it is not ready yet.
    fn get_resource(&self, request_id: &str)
    -> ProviderResult<Result<Option<Resource>, InfrastructureError>>;

    /// Deletes a resource, or cancels an outstanding request, identified by `id`.
    fn delete_resource(&self, id: &str) -> ProviderResult<Result<(), InfrastructureError>>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ProviderConfig {
    Local(LocalProviderConfig),
    Static(FixedHostsConfig),
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::Local(LocalProviderConfig::default())
    }
}

impl ProviderConfig {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderConfig::Local(_) => "local",
            ProviderConfig::Static(_) => "static",
        }
    }
}

pub fn create_provider(config: &ProviderConfig) -> Box<dyn InfrastructureProvider> {
    match config {
        ProviderConfig::Local(config) => Box::new(LocalProvider::new(config.clone())),
        ProviderConfig::Static(config) => Box::new(FixedHostsProvider::new(config.clone())),
    }
}
