use std::collections::BTreeMap;

use serde::Deserialize;

use crate::common::IdCounter;
use crate::infra::provider::{
    InfrastructureError, InfrastructureProvider, ProviderResult, RequestResourceError,
};
use crate::resource::{Resource, METADATA_HOST, METADATA_PORT, METADATA_REQUEST_TYPE};
use crate::specification::Specification;
use crate::{RequestId, WrappedRcRefCell};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FixedHost {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FixedHostsConfig {
    #[serde(default)]
    pub hosts: Vec<FixedHost>,
}

struct Claim {
    request_id: RequestId,
    spec: Specification,
}

struct HostSlot {
    host: FixedHost,
    claim: Option<Claim>,
}

impl HostSlot {
    fn to_resource(&self, request_id: &str, spec: &Specification) -> Resource {
        let mut resource = Resource::new(&self.host.name, request_id, spec.clone())
            .with_metadata(METADATA_HOST, &self.host.address);
        if let Some(port) = self.host.port {
            resource.put_metadata(METADATA_PORT, port.to_string());
        }
        // Request type is set from the requested `Specification` only
        for (key, value) in &self.host.attributes {
            if key != METADATA_REQUEST_TYPE {
                resource.put_metadata(key, value);
            }
        }
        resource
    }
}

/// A fixed set of machines; every machine can serve one request at a time.
pub struct FixedHostsProvider {
    slots: WrappedRcRefCell<Vec<HostSlot>>,
    counter: IdCounter,
}

impl FixedHostsProvider {
    pub fn new(config: FixedHostsConfig) -> Self {
        let slots = config
            .hosts
            .into_iter()
            .map(|host| HostSlot { host, claim: None })
            .collect();
        Self {
            slots: WrappedRcRefCell::wrap(slots),
            counter: IdCounter::default(),
        }
    }
}

impl InfrastructureProvider for FixedHostsProvider {
    fn request_resource(
        &mut self,
        spec: &Specification,
    ) -> ProviderResult<Result<RequestId, RequestResourceError>> {
        let mut slots = self.slots.get_mut();
        let request_id = format!("fixed-req-{}", self.counter.next());
        let free = slots
            .iter_mut()
            .find(|slot| slot.claim.is_none() && slot.to_resource(&request_id, spec).matches(spec));
        let result = match free {
            Some(slot) => {
                log::debug!("Host {} claimed by request {request_id}", slot.host.name);
                slot.claim = Some(Claim {
                    request_id: request_id.clone(),
                    spec: spec.clone(),
                });
                Ok(request_id)
            }
            None => Err(RequestResourceError::NoCapacity(spec.image.clone())),
        };
        Box::pin(async move { result })
    }

    fn get_resource(
        &self,
        request_id: &str,
    ) -> ProviderResult<Result<Option<Resource>, InfrastructureError>> {
        let slots = self.slots.get();
        let result = slots
            .iter()
            .find_map(|slot| match &slot.claim {
                Some(claim) if claim.request_id == request_id => {
                    Some(slot.to_resource(request_id, &claim.spec))
                }
                _ => None,
            })
            .map(Some)
            .ok_or_else(|| InfrastructureError::NotFound(request_id.to_string()));
        Box::pin(async move { result })
    }

    fn delete_resource(&self, id: &str) -> ProviderResult<Result<(), InfrastructureError>> {
        let mut slots = self.slots.get_mut();
        let slot = slots.iter_mut().find(|slot| match &slot.claim {
            Some(claim) => slot.host.name == id || claim.request_id == id,
            None => false,
        });
        let result = match slot {
            Some(slot) => {
                slot.claim = None;
                log::debug!("Host {} released", slot.host.name);
                Ok(())
            }
            None => Err(InfrastructureError::NotFound(id.to_string())),
        };
        Box::pin(async move { result })
    }
}
