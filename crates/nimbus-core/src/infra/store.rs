use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::infra::order::{Order, OrderState};
use crate::infra::pool::IdleEntry;
use crate::{RequestId, ResourceId};

/// Keeps track of provisioned resources across restarts, so that resources leaked by a crashed
/// run can be deleted by the next one.
pub trait InfrastructureStore {
    fn update_infrastructure_state(&mut self, orders: &[Order], idle: &[IdleEntry])
    -> crate::Result<()>;

    /// Returns identifiers (resource ids, or request ids of unfinished requests) that were
    /// recorded by a previous run.
    fn recover_request_ids(&self) -> crate::Result<Vec<RequestId>>;

    fn clear(&mut self) -> crate::Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
struct StoredRequest {
    request_id: Option<RequestId>,
    resource_id: Option<ResourceId>,
}

impl StoredRequest {
    fn into_id(self) -> Option<String> {
        self.resource_id.or(self.request_id)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredState {
    orders: Vec<StoredRequest>,
    idle: Vec<StoredRequest>,
}

/// Stores the infrastructure state into a JSON document.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, state: &StoredState) -> crate::Result<()> {
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, serde_json::to_vec_pretty(state)?)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl InfrastructureStore for JsonFileStore {
    fn update_infrastructure_state(
        &mut self,
        orders: &[Order],
        idle: &[IdleEntry],
    ) -> crate::Result<()> {
        let orders = orders
            .iter()
            .filter(|order| order.state() != OrderState::Open)
            .map(|order| StoredRequest {
                request_id: order.request_id().map(|s| s.to_string()),
                resource_id: order.resource_id().map(|s| s.to_string()),
            })
            .collect();
        let idle = idle
            .iter()
            .map(|entry| StoredRequest {
                request_id: Some(entry.resource.request_id().to_string()),
                resource_id: Some(entry.resource.id().to_string()),
            })
            .collect();
        self.write(&StoredState { orders, idle })
    }

    fn recover_request_ids(&self) -> crate::Result<Vec<RequestId>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let data = std::fs::read(&self.path)?;
        let state: StoredState = serde_json::from_slice(&data)?;
        Ok(state
            .orders
            .into_iter()
            .chain(state.idle)
            .filter_map(StoredRequest::into_id)
            .collect())
    }

    fn clear(&mut self) -> crate::Result<()> {
        self.write(&StoredState::default())
    }
}

/// Does not remember anything.
pub struct NullStore;

impl InfrastructureStore for NullStore {
    fn update_infrastructure_state(&mut self, _: &[Order], _: &[IdleEntry]) -> crate::Result<()> {
        Ok(())
    }

    fn recover_request_ids(&self) -> crate::Result<Vec<RequestId>> {
        Ok(vec![])
    }

    fn clear(&mut self) -> crate::Result<()> {
        Ok(())
    }
}

pub fn create_store(path: Option<&Path>) -> Box<dyn InfrastructureStore> {
    match path {
        Some(path) => Box::new(JsonFileStore::new(path.to_path_buf())),
        None => Box::new(NullStore),
    }
}

#[cfg(test)]
mod tests {
    use super::{InfrastructureStore, JsonFileStore};
    use crate::infra::order::{Order, OrderOwner};
    use crate::infra::pool::{Expiration, IdleEntry};
    use crate::resource::Resource;
    use crate::specification::Specification;
    use crate::OrderId;
    use tempfile::TempDir;

    #[test]
    fn missing_file_recovers_nothing() {
        let dir = TempDir::with_prefix("nimbus").unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        assert!(store.recover_request_ids().unwrap().is_empty());
    }

    #[test]
    fn recover_recorded_ids() {
        let dir = TempDir::with_prefix("nimbus").unwrap();
        let mut store = JsonFileStore::new(dir.path().join("state.json"));
        let spec = Specification::new("image", "key");

        let open = Order::new(OrderId::new(0), spec.clone(), OrderOwner::StaticPool);
        let mut ordered = Order::new(OrderId::new(1), spec.clone(), OrderOwner::StaticPool);
        ordered.mark_ordered("req-1".to_string());
        let mut fulfilled = Order::new(OrderId::new(2), spec.clone(), OrderOwner::StaticPool);
        fulfilled.mark_ordered("req-2".to_string());
        fulfilled.mark_fulfilled("vm-2".to_string());
        let idle = IdleEntry {
            resource: Resource::new("vm-3", "req-3", spec),
            expiration: Expiration::Never,
        };

        store
            .update_infrastructure_state(&[open, ordered, fulfilled], &[idle])
            .unwrap();
        assert_eq!(
            store.recover_request_ids().unwrap(),
            vec!["req-1".to_string(), "vm-2".to_string(), "vm-3".to_string()]
        );

        store.clear().unwrap();
        assert!(store.recover_request_ids().unwrap().is_empty());
    }
}
