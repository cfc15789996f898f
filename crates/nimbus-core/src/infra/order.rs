use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::scheduler::service::SchedulerHandle;
use crate::specification::Specification;
use crate::{OrderId, RequestId, ResourceId, SchedulerId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    /// Waiting for an idle resource or for a provisioning request to be made.
    Open,
    /// A provisioning request is outstanding at the provider.
    Ordered,
    /// A live resource was handed to the owner.
    Fulfilled,
}

impl Display for OrderState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OrderState::Open => "open",
            OrderState::Ordered => "ordered",
            OrderState::Fulfilled => "fulfilled",
        })
    }
}

/// Who receives the resource once the order is fulfilled.
#[derive(Debug, Clone)]
pub enum OrderOwner {
    SchedulerBound(SchedulerHandle),
    /// Pre-provisioned resources that land in the idle pool.
    StaticPool,
}

impl OrderOwner {
    pub fn scheduler_id(&self) -> Option<SchedulerId> {
        match self {
            OrderOwner::SchedulerBound(handle) => Some(handle.id()),
            OrderOwner::StaticPool => None,
        }
    }
}

#[derive(Debug)]
pub struct Order {
    id: OrderId,
    spec: Specification,
    owner: OrderOwner,
    state: OrderState,
    request_id: Option<RequestId>,
    resource_id: Option<ResourceId>,
}

impl Order {
    pub fn new(id: OrderId, spec: Specification, owner: OrderOwner) -> Self {
        Self {
            id,
            spec,
            owner,
            state: OrderState::Open,
            request_id: None,
            resource_id: None,
        }
    }

    #[inline]
    pub fn id(&self) -> OrderId {
        self.id
    }

    #[inline]
    pub fn spec(&self) -> &Specification {
        &self.spec
    }

    #[inline]
    pub fn state(&self) -> OrderState {
        self.state
    }

    pub fn owner(&self) -> &OrderOwner {
        &self.owner
    }

    pub fn scheduler(&self) -> Option<&SchedulerHandle> {
        match &self.owner {
            OrderOwner::SchedulerBound(handle) => Some(handle),
            OrderOwner::StaticPool => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, OrderState::Open | OrderState::Ordered)
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }

    pub fn mark_ordered(&mut self, request_id: RequestId) {
        if self.state != OrderState::Open {
            log::error!(
                "Order {} cannot move from {} to ordered",
                self.id,
                self.state
            );
            return;
        }
        self.request_id = Some(request_id);
        self.state = OrderState::Ordered;
    }

    pub fn mark_fulfilled(&mut self, resource_id: ResourceId) {
        if self.state == OrderState::Fulfilled {
            log::error!("Order {} is already fulfilled", self.id);
            return;
        }
        self.resource_id = Some(resource_id);
        self.state = OrderState::Fulfilled;
    }

    /// Detaches the outstanding provisioning request from this order.
    pub fn take_request_id(&mut self) -> Option<RequestId> {
        self.request_id.take()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderInfo {
    pub id: OrderId,
    pub state: OrderState,
    pub scheduler: Option<SchedulerId>,
    pub spec: Specification,
    pub request_id: Option<RequestId>,
    pub resource_id: Option<ResourceId>,
}

impl From<&Order> for OrderInfo {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            state: order.state,
            scheduler: order.owner.scheduler_id(),
            spec: order.spec.clone(),
            request_id: order.request_id.clone(),
            resource_id: order.resource_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Order, OrderOwner, OrderState};
    use crate::specification::Specification;
    use crate::OrderId;

    fn order() -> Order {
        Order::new(
            OrderId::new(1),
            Specification::new("image", "key"),
            OrderOwner::StaticPool,
        )
    }

    #[test]
    fn states_only_move_forward() {
        let mut order = order();
        order.mark_ordered("req-1".to_string());
        assert_eq!(order.state(), OrderState::Ordered);
        order.mark_fulfilled("vm-1".to_string());
        assert_eq!(order.state(), OrderState::Fulfilled);

        order.mark_ordered("req-2".to_string());
        assert_eq!(order.state(), OrderState::Fulfilled);
        assert_eq!(order.request_id(), Some("req-1"));
    }

    #[test]
    fn open_order_can_be_fulfilled_directly() {
        let mut order = order();
        order.mark_fulfilled("vm-1".to_string());
        assert_eq!(order.state(), OrderState::Fulfilled);
        assert_eq!(order.resource_id(), Some("vm-1"));
        assert!(order.request_id().is_none());
    }
}
