use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::requirements::parse_requirement;
use crate::specification::{RequestType, Specification};
use crate::{RequestId, ResourceId};

pub const METADATA_HOST: &str = "host";
pub const METADATA_PORT: &str = "port";
pub const METADATA_REQUEST_TYPE: &str = "request-type";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceState {
    /// Granted to a scheduler, not running anything.
    Idle,
    /// Running a task.
    Allocated,
    /// Has to be given up, whatever runs on it is lost.
    ToRemove,
}

/// A provisioned compute instance.
///
/// Two resources are the same resource if they have the same id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    id: ResourceId,
    request_id: RequestId,
    spec: Specification,
    state: ResourceState,
    metadata: BTreeMap<String, String>,
    reuse_count: u32,
}

impl Resource {
    pub fn new(id: impl Into<ResourceId>, request_id: impl Into<RequestId>, spec: Specification) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            METADATA_REQUEST_TYPE.to_string(),
            spec.request_type.as_str().to_string(),
        );
        Self {
            id: id.into(),
            request_id: request_id.into(),
            spec,
            state: ResourceState::Idle,
            metadata,
            reuse_count: 0,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.put_metadata(key, value);
        self
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    #[inline]
    pub fn spec(&self) -> &Specification {
        &self.spec
    }

    #[inline]
    pub fn state(&self) -> ResourceState {
        self.state
    }

    pub fn set_state(&mut self, state: ResourceState) {
        self.state = state;
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn put_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn request_type(&self) -> RequestType {
        self.metadata
            .get(METADATA_REQUEST_TYPE)
            .and_then(|value| RequestType::parse(value))
            .unwrap_or_default()
    }

    pub fn is_persistent(&self) -> bool {
        self.request_type() == RequestType::Persistent
    }

    pub fn host(&self) -> Option<&str> {
        self.metadata.get(METADATA_HOST).map(|s| s.as_str())
    }

    pub fn port(&self) -> Option<u16> {
        self.metadata
            .get(METADATA_PORT)
            .and_then(|port| port.parse().ok())
    }

    /// Number of tasks this resource has finished serving.
    pub fn reuse_count(&self) -> u32 {
        self.reuse_count
    }

    pub fn increment_reuse_count(&mut self) {
        self.reuse_count += 1;
    }

    /// Does this resource satisfy `spec`?
    ///
    /// Image and public key are compared ignoring ASCII case, every requirement expression of
    /// `spec` has to hold for the metadata of this resource.
    pub fn matches(&self, spec: &Specification) -> bool {
        if !self.spec.image.eq_ignore_ascii_case(&spec.image)
            || !self.spec.public_key.eq_ignore_ascii_case(&spec.public_key)
        {
            return false;
        }
        spec.requirements
            .iter()
            .all(|(name, expr)| match parse_requirement(expr) {
                Ok(expr) => expr.evaluate(&self.metadata),
                Err(error) => {
                    log::warn!("Requirement '{name}' cannot be evaluated: {error}");
                    false
                }
            })
    }

    /// Refreshes connection information from a newer view of the same resource.
    pub fn copy_information(&mut self, other: &Resource) {
        for (key, value) in &other.metadata {
            if key != METADATA_REQUEST_TYPE {
                self.metadata.insert(key.clone(), value.clone());
            }
        }
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Resource {}

impl Display for Resource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)?;
        if let Some(host) = self.host() {
            write!(f, " ({host}")?;
            if let Some(port) = self.port() {
                write!(f, ":{port}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Resource, METADATA_HOST};
    use crate::specification::{RequestType, Specification};

    fn spec() -> Specification {
        Specification::new("Ubuntu-22.04", "ssh-rsa KEY")
    }

    #[test]
    fn match_ignores_case_of_image_and_key() {
        let resource = Resource::new("r1", "q1", spec());
        assert!(resource.matches(&Specification::new("ubuntu-22.04", "SSH-RSA key")));
        assert!(!resource.matches(&Specification::new("debian", "ssh-rsa KEY")));
        assert!(!resource.matches(&Specification::new("ubuntu-22.04", "other")));
    }

    #[test]
    fn match_evaluates_requirements() {
        let resource = Resource::new("r1", "q1", spec())
            .with_metadata("vcpu", "4")
            .with_metadata("memory", "8192");
        assert!(resource.matches(&spec().with_requirement("cpu", "vcpu >= 2")));
        assert!(resource.matches(
            &spec()
                .with_requirement("cpu", "vcpu >= 2")
                .with_requirement("mem", "memory >= 4096")
        ));
        assert!(!resource.matches(&spec().with_requirement("cpu", "vcpu >= 8")));
        assert!(!resource.matches(&spec().with_requirement("broken", "vcpu >=")));
    }

    #[test]
    fn request_type_comes_from_spec() {
        let resource = Resource::new("r1", "q1", spec());
        assert!(!resource.is_persistent());
        let resource = Resource::new(
            "r2",
            "q2",
            spec().with_request_type(RequestType::Persistent),
        );
        assert!(resource.is_persistent());
    }

    #[test]
    fn copy_information_keeps_request_type() {
        let mut resource = Resource::new(
            "r1",
            "q1",
            spec().with_request_type(RequestType::Persistent),
        )
        .with_metadata(METADATA_HOST, "10.0.0.1");
        let fresh = Resource::new("r1", "q1", spec()).with_metadata(METADATA_HOST, "10.0.0.2");
        resource.copy_information(&fresh);
        assert_eq!(resource.host(), Some("10.0.0.2"));
        assert!(resource.is_persistent());
    }
}
