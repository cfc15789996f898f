use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::common::timeutils::deserialize_human_duration_opt;
use crate::common::IdCounter;
use crate::infra::provider::{
    InfrastructureError, InfrastructureProvider, ProviderResult, RequestResourceError,
};
use crate::resource::{Resource, METADATA_HOST, METADATA_REQUEST_TYPE};
use crate::specification::Specification;
use crate::{Map, RequestId, ResourceId, WrappedRcRefCell};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct LocalProviderConfig {
    /// How long it takes until a requested instance is ready.
    #[serde(default, deserialize_with = "deserialize_human_duration_opt")]
    pub startup_delay: Option<Duration>,
    /// Attributes advertised by every instance, used by requirement expressions.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Maximum number of instances that may exist at once.
    #[serde(default)]
    pub max_instances: Option<u32>,
}

struct LocalInstance {
    spec: Specification,
    resource_id: ResourceId,
    requested_at: Instant,
}

#[derive(Default)]
struct LocalState {
    counter: IdCounter,
    instances: Map<RequestId, LocalInstance>,
}

/// Instances simulated on this machine.
pub struct LocalProvider {
    config: LocalProviderConfig,
    state: WrappedRcRefCell<LocalState>,
}

impl LocalProvider {
    pub fn new(config: LocalProviderConfig) -> Self {
        Self {
            config,
            state: WrappedRcRefCell::wrap(LocalState {
                counter: IdCounter::starting_at(1),
                instances: Default::default(),
            }),
        }
    }
}

impl InfrastructureProvider for LocalProvider {
    fn request_resource(
        &mut self,
        spec: &Specification,
    ) -> ProviderResult<Result<RequestId, RequestResourceError>> {
        let mut state = self.state.get_mut();
        let result = match self.config.max_instances {
            Some(max) if state.instances.len() >= max as usize => {
                Err(RequestResourceError::NoCapacity(spec.image.clone()))
            }
            _ => {
                let index = state.counter.next();
                let request_id = format!("local-req-{index}");
                state.instances.insert(
                    request_id.clone(),
                    LocalInstance {
                        spec: spec.clone(),
                        resource_id: format!("local-{index}"),
                        requested_at: Instant::now(),
                    },
                );
                Ok(request_id)
            }
        };
        Box::pin(async move { result })
    }

    fn get_resource(
        &self,
        request_id: &str,
    ) -> ProviderResult<Result<Option<Resource>, InfrastructureError>> {
        let state = self.state.get();
        let delay = self.config.startup_delay.unwrap_or_default();
        let result = match state.instances.get(request_id) {
            Some(instance) if instance.requested_at.elapsed() >= delay => {
                let mut resource =
                    Resource::new(&instance.resource_id, request_id, instance.spec.clone())
                        .with_metadata(METADATA_HOST, "127.0.0.1");
                for (key, value) in &self.config.attributes {
                    if key != METADATA_REQUEST_TYPE {
                        resource.put_metadata(key, value);
                    }
                }
                Ok(Some(resource))
            }
            Some(_) => Ok(None),
            None => Err(InfrastructureError::NotFound(request_id.to_string())),
        };
        Box::pin(async move { result })
    }

    fn delete_resource(&self, id: &str) -> ProviderResult<Result<(), InfrastructureError>> {
        let mut state = self.state.get_mut();
        let key = state
            .instances
            .iter()
            .find(|(request_id, instance)| *request_id == id || instance.resource_id == id)
            .map(|(request_id, _)| request_id.clone());
        let result = match key {
            Some(key) => {
                state.instances.remove(&key);
                log::debug!("Local instance {id} deleted");
                Ok(())
            }
            None => Err(InfrastructureError::NotFound(id.to_string())),
        };
        Box::pin(async move { result })
    }
}
