use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::resource::Resource;
use crate::{Map, OrderId, ResourceId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expiration {
    Never,
    At(SystemTime),
}

impl Expiration {
    pub fn is_expired(&self, now: SystemTime) -> bool {
        match self {
            Expiration::Never => false,
            Expiration::At(time) => now > *time,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdleEntry {
    pub resource: Resource,
    pub expiration: Expiration,
}

#[derive(Debug)]
pub struct Allocation {
    pub resource: Resource,
    /// `None` if the resource was handed out without an order.
    pub order: Option<OrderId>,
}

/// Idle and allocated resources.
///
/// A resource is in at most one of the two collections; every method that inserts into one of
/// them removes the resource from the other one.
#[derive(Default, Debug)]
pub struct ResourcePool {
    /// Kept in the order in which the resources became idle.
    idle: Vec<IdleEntry>,
    allocated: Map<ResourceId, Allocation>,
}

impl ResourcePool {
    pub fn idle(&self) -> &[IdleEntry] {
        &self.idle
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    pub fn allocated(&self) -> impl Iterator<Item = &Allocation> {
        self.allocated.values()
    }

    pub fn allocated_count(&self) -> usize {
        self.allocated.len()
    }

    pub fn is_idle(&self, resource_id: &str) -> bool {
        self.idle.iter().any(|e| e.resource.id() == resource_id)
    }

    pub fn is_allocated(&self, resource_id: &str) -> bool {
        self.allocated.contains_key(resource_id)
    }

    pub fn get_idle_mut(&mut self, resource_id: &str) -> Option<&mut IdleEntry> {
        self.idle.iter_mut().find(|e| e.resource.id() == resource_id)
    }

    pub fn take_idle(&mut self, resource_id: &str) -> Option<IdleEntry> {
        let index = self
            .idle
            .iter()
            .position(|e| e.resource.id() == resource_id)?;
        Some(self.idle.remove(index))
    }

    pub fn park_idle(&mut self, resource: Resource, expiration: Expiration) {
        self.allocated.remove(resource.id());
        self.idle.retain(|e| e.resource.id() != resource.id());
        self.idle.push(IdleEntry {
            resource,
            expiration,
        });
    }

    pub fn allocate(&mut self, resource: Resource, order: Option<OrderId>) {
        self.idle.retain(|e| e.resource.id() != resource.id());
        self.allocated.insert(
            resource.id().to_string(),
            Allocation { resource, order },
        );
    }

    pub fn deallocate(&mut self, resource_id: &str) -> Option<Allocation> {
        self.allocated.remove(resource_id)
    }

    pub fn drain(&mut self) -> Vec<Resource> {
        let mut resources: Vec<Resource> = self.idle.drain(..).map(|e| e.resource).collect();
        resources.extend(self.allocated.drain().map(|(_, a)| a.resource));
        resources
    }
}
