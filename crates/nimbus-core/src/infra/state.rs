use std::time::SystemTime;

use serde::Serialize;

use crate::common::rpc::ResponseToken;
use crate::common::IdCounter;
use crate::infra::config::InfrastructureConfig;
use crate::infra::connectivity::ConnectivityCheck;
use crate::infra::order::{Order, OrderInfo, OrderOwner};
use crate::infra::pool::{Expiration, ResourcePool};
use crate::infra::provider::InfrastructureProvider;
use crate::infra::store::InfrastructureStore;
use crate::specification::Specification;
use crate::{OrderId, ResourceId, SchedulerId};

/// Everything owned by the infrastructure manager.
pub struct InfraState {
    config: InfrastructureConfig,
    /// Kept in creation order, which is the order in which they are resolved.
    orders: Vec<Order>,
    pool: ResourcePool,
    order_id_counter: IdCounter,
    provider: Box<dyn InfrastructureProvider>,
    connectivity: Box<dyn ConnectivityCheck>,
    store: Box<dyn InfrastructureStore>,
    initial_waiters: Vec<ResponseToken<()>>,
}

impl InfraState {
    pub fn new(
        config: InfrastructureConfig,
        provider: Box<dyn InfrastructureProvider>,
        connectivity: Box<dyn ConnectivityCheck>,
        store: Box<dyn InfrastructureStore>,
    ) -> Self {
        Self {
            config,
            orders: Default::default(),
            pool: Default::default(),
            order_id_counter: Default::default(),
            provider,
            connectivity,
            store,
            initial_waiters: Default::default(),
        }
    }

    pub fn config(&self) -> &InfrastructureConfig {
        &self.config
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut ResourcePool {
        &mut self.pool
    }

    pub fn provider_mut(&mut self) -> &mut dyn InfrastructureProvider {
        self.provider.as_mut()
    }

    pub fn provider(&self) -> &dyn InfrastructureProvider {
        self.provider.as_ref()
    }

    pub fn connectivity(&self) -> &dyn ConnectivityCheck {
        self.connectivity.as_ref()
    }

    pub fn create_order(&mut self, spec: Specification, owner: OrderOwner) -> OrderId {
        let id = OrderId::new(self.order_id_counter.next());
        self.orders.push(Order::new(id, spec, owner));
        id
    }

    pub fn get_order(&self, id: OrderId) -> Option<&Order> {
        self.orders.iter().find(|o| o.id() == id)
    }

    pub fn get_order_mut(&mut self, id: OrderId) -> Option<&mut Order> {
        self.orders.iter_mut().find(|o| o.id() == id)
    }

    pub fn remove_order(&mut self, id: OrderId) -> Option<Order> {
        let index = self.orders.iter().position(|o| o.id() == id)?;
        Some(self.orders.remove(index))
    }

    /// Pending orders of a scheduler for the given specification, oldest first.
    pub fn pending_orders_of(&self, scheduler: SchedulerId, spec: &Specification) -> Vec<OrderId> {
        self.orders
            .iter()
            .filter(|o| {
                o.is_pending()
                    && o.owner().scheduler_id() == Some(scheduler)
                    && o.spec() == spec
            })
            .map(|o| o.id())
            .collect()
    }

    pub fn idle_expiration(&self, persistent: bool, now: SystemTime) -> Expiration {
        if persistent {
            Expiration::Never
        } else {
            Expiration::At(now + self.config.idle_lifetime)
        }
    }

    /// Records the current state into the store. Failures only degrade crash recovery.
    pub fn persist(&mut self) {
        if let Err(error) = self
            .store
            .update_infrastructure_state(&self.orders, self.pool.idle())
        {
            log::warn!("Cannot persist infrastructure state: {error}");
        }
    }

    pub fn store_mut(&mut self) -> &mut dyn InfrastructureStore {
        self.store.as_mut()
    }

    pub fn add_initial_waiter(&mut self, token: ResponseToken<()>) {
        self.initial_waiters.push(token);
        self.notify_initial_waiters();
    }

    /// Answers waiters once there is an idle resource for every initial specification.
    pub fn notify_initial_waiters(&mut self) {
        if self.initial_waiters.is_empty()
            || self.pool.idle_count() < self.config.initial_specs.len()
        {
            return;
        }
        for token in self.initial_waiters.drain(..) {
            token.respond(());
        }
    }

    pub fn clear_orders(&mut self) -> Vec<Order> {
        std::mem::take(&mut self.orders)
    }

    pub fn snapshot(&self) -> InfraSnapshot {
        InfraSnapshot {
            orders: self.orders.iter().map(OrderInfo::from).collect(),
            idle: self
                .pool
                .idle()
                .iter()
                .map(|entry| IdleInfo {
                    resource_id: entry.resource.id().to_string(),
                    spec: entry.resource.spec().clone(),
                    expiration: match entry.expiration {
                        Expiration::Never => None,
                        Expiration::At(time) => Some(time),
                    },
                })
                .collect(),
            allocated: self
                .pool
                .allocated()
                .map(|allocation| AllocatedInfo {
                    resource_id: allocation.resource.id().to_string(),
                    order: allocation.order,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IdleInfo {
    pub resource_id: ResourceId,
    pub spec: Specification,
    pub expiration: Option<SystemTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllocatedInfo {
    pub resource_id: ResourceId,
    pub order: Option<OrderId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfraSnapshot {
    pub orders: Vec<OrderInfo>,
    pub idle: Vec<IdleInfo>,
    pub allocated: Vec<AllocatedInfo>,
}
