use std::time::SystemTime;

use futures::future::join_all;
use tokio::time::MissedTickBehavior;

use crate::common::rpc::RpcReceiver;
use crate::infra::order::{OrderOwner, OrderState};
use crate::infra::pool::{Expiration, IdleEntry};
use crate::infra::provider::InfrastructureError;
use crate::infra::service::InfraMessage;
use crate::infra::state::InfraState;
use crate::resource::{Resource, ResourceState};
use crate::scheduler::service::SchedulerHandle;
use crate::specification::Specification;
use crate::{OrderId, RequestId, ResourceId, SchedulerId};

/// Where a resource that is being related to an order comes from.
enum ResourceOrigin {
    /// Taken out of the idle pool, with its previous expiration.
    Idle(Expiration),
    /// Freshly delivered by the provider for an outstanding request.
    Provider,
}

/// The infrastructure manager actor.
///
/// Orders and the resource pool are owned by this single future, so order resolution, the
/// health check and message handling never interleave on the same resource.
pub async fn infra_manager_process(mut state: InfraState, mut receiver: RpcReceiver<InfraMessage>) {
    start(&mut state, SystemTime::now()).await;

    let mut order_interval = tokio::time::interval(state.config().order_period);
    order_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut resource_interval = tokio::time::interval(state.config().resource_period);
    resource_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let stop_token = loop {
        tokio::select! {
            _ = order_interval.tick() => {
                resolve_orders(&mut state, SystemTime::now()).await;
            }
            _ = resource_interval.tick() => {
                check_idle_resources(&mut state, SystemTime::now()).await;
                check_allocated_resources(&mut state).await;
            }
            message = receiver.recv() => {
                match message {
                    Some(InfraMessage::Stop(token)) => break Some(token),
                    Some(message) => handle_message(&mut state, message, SystemTime::now()).await,
                    None => break None,
                }
            }
        }
        state.notify_initial_waiters();
    };

    log::debug!("Infrastructure manager is stopping");
    stop(&mut state).await;
    if let Some(token) = stop_token {
        token.respond(());
    }
}

pub(crate) async fn handle_message(state: &mut InfraState, message: InfraMessage, now: SystemTime) {
    log::debug!("Handling infrastructure message: {message:?}");
    match message {
        InfraMessage::OrderResource { spec, scheduler } => {
            order_resource(state, spec, scheduler, now).await;
        }
        InfraMessage::EnsureDemand {
            spec,
            count,
            scheduler,
        } => ensure_demand(state, spec, count, scheduler, now).await,
        InfraMessage::ReleaseResource(resource) => release_resource(state, resource, now).await,
        InfraMessage::WithdrawOrders(scheduler) => withdraw_orders(state, scheduler),
        InfraMessage::WaitForInitialResources(token) => state.add_initial_waiter(token),
        InfraMessage::GetSnapshot(token) => token.respond(state.snapshot()),
        InfraMessage::Stop(token) => {
            stop(state).await;
            token.respond(());
            return;
        }
    }
    state.persist();
}

/// Creates an order on behalf of a scheduler and tries to resolve it right away.
pub(crate) async fn order_resource(
    state: &mut InfraState,
    spec: Specification,
    scheduler: SchedulerHandle,
    now: SystemTime,
) -> OrderId {
    let id = state.create_order(spec, OrderOwner::SchedulerBound(scheduler));
    log::debug!("Order {id} created");
    resolve_open_order(state, id, now).await;
    id
}

/// One pass of order resolution: open orders are served from the idle pool or requested from
/// the provider, outstanding requests are polled.
pub(crate) async fn resolve_orders(state: &mut InfraState, now: SystemTime) {
    let orders: Vec<(OrderId, OrderState)> = state
        .orders()
        .iter()
        .map(|order| (order.id(), order.state()))
        .collect();
    for (id, order_state) in orders {
        match order_state {
            OrderState::Open => resolve_open_order(state, id, now).await,
            OrderState::Ordered => resolve_ordered_order(state, id, now).await,
            OrderState::Fulfilled => {}
        }
    }
    state.persist();
}

async fn resolve_open_order(state: &mut InfraState, id: OrderId, now: SystemTime) {
    let (spec, bound) = match state.get_order(id) {
        Some(order) if order.state() == OrderState::Open => {
            (order.spec().clone(), order.scheduler().is_some())
        }
        _ => return,
    };

    if bound {
        let candidates: Vec<ResourceId> = state
            .pool()
            .idle()
            .iter()
            .filter(|entry| entry.resource.matches(&spec))
            .map(|entry| entry.resource.id().to_string())
            .collect();
        for resource_id in candidates {
            let Some(entry) = state.pool_mut().take_idle(&resource_id) else {
                continue;
            };
            log::debug!("Trying idle resource {} for order {id}", entry.resource);
            let origin = ResourceOrigin::Idle(entry.expiration);
            if relate_resource_to_order(state, entry.resource, id, origin, now).await {
                return;
            }
        }
        if !state.config().elastic {
            log::debug!("Order {id} waits for a released resource");
            return;
        }
    }

    let request = state.provider_mut().request_resource(&spec);
    match request.await {
        Ok(request_id) => {
            log::info!("Requested resource {request_id} ({}) for order {id}", spec.image);
            if let Some(order) = state.get_order_mut(id) {
                order.mark_ordered(request_id);
            }
        }
        Err(error) => {
            log::warn!("Cannot request a resource for order {id}, it stays open: {error}");
        }
    }
}

async fn resolve_ordered_order(state: &mut InfraState, id: OrderId, now: SystemTime) {
    let request_id = match state.get_order(id) {
        Some(order) if order.state() == OrderState::Ordered => order.request_id().map(String::from),
        _ => return,
    };
    let Some(request_id) = request_id else {
        log::error!("Order {id} is ordered without a request");
        return;
    };

    let fut = state.provider().get_resource(&request_id);
    match fut.await {
        Ok(Some(resource)) => {
            relate_resource_to_order(state, resource, id, ResourceOrigin::Provider, now).await;
        }
        Ok(None) => log::debug!("Request {request_id} of order {id} is not ready yet"),
        Err(InfrastructureError::NotFound(_)) => {
            log::warn!("Request {request_id} of order {id} was lost, ordering again");
            if let Some(order) = state.remove_order(id) {
                let new_id = state.create_order(order.spec().clone(), order.owner().clone());
                log::debug!("Order {new_id} replaces order {id}");
            }
        }
        Err(error) => log::warn!("Cannot poll request {request_id} of order {id}: {error}"),
    }
}

/// Checks that the resource can be used. A persistent resource that cannot be reached gets a
/// chance to refresh its connection information from the provider.
async fn revalidate(state: &InfraState, mut resource: Resource) -> Option<Resource> {
    if state.connectivity().is_reachable(&resource).await {
        return Some(resource);
    }
    if !resource.is_persistent() {
        log::debug!("Resource {resource} is not reachable");
        return None;
    }

    let fut = state.provider().get_resource(resource.request_id());
    match fut.await {
        Ok(Some(fresh)) => resource.copy_information(&fresh),
        Ok(None) => return None,
        Err(error) => {
            log::warn!("Cannot refresh persistent resource {resource}: {error}");
            return None;
        }
    }
    if state.connectivity().is_reachable(&resource).await {
        log::debug!("Persistent resource {resource} reachable after refresh");
        Some(resource)
    } else {
        None
    }
}

/// Returns `true` if the resource was consumed by the order.
async fn relate_resource_to_order(
    state: &mut InfraState,
    resource: Resource,
    order_id: OrderId,
    origin: ResourceOrigin,
    now: SystemTime,
) -> bool {
    state.pool_mut().allocate(resource.clone(), Some(order_id));
    if let Some(resource) = revalidate(state, resource.clone()).await {
        return fulfil_order(state, resource, order_id, now);
    }

    state.pool_mut().deallocate(resource.id());
    match origin {
        ResourceOrigin::Idle(expiration) => {
            if resource.is_persistent() {
                state.pool_mut().park_idle(resource, expiration);
            } else {
                log::info!("Idle resource {resource} failed validation, disposing");
                dispose_resource(state, resource, now).await;
            }
        }
        ResourceOrigin::Provider => {
            log::debug!("Resource {resource} of order {order_id} is not usable yet");
        }
    }
    false
}

/// Hands an allocated resource to the owner of the order.
///
/// Static orders end here and their resource goes to the idle pool. A resource whose
/// scheduler has gone away goes to the idle pool as well.
fn fulfil_order(
    state: &mut InfraState,
    mut resource: Resource,
    order_id: OrderId,
    now: SystemTime,
) -> bool {
    resource.set_state(ResourceState::Idle);
    let Some(order) = state.get_order_mut(order_id) else {
        log::warn!("Order {order_id} disappeared, resource {resource} becomes idle");
        move_resource_to_idle(state, resource, now);
        return false;
    };
    order.mark_fulfilled(resource.id().to_string());

    match order.scheduler().cloned() {
        Some(handle) => {
            state.pool_mut().allocate(resource.clone(), Some(order_id));
            if handle.resource_ready(resource.clone()) {
                log::info!("Resource {resource} delivered to {handle:?} (order {order_id})");
            } else {
                log::warn!("{handle:?} is gone, resource {resource} becomes idle");
                state.remove_order(order_id);
                move_resource_to_idle(state, resource, now);
            }
        }
        None => {
            log::info!("Resource {resource} of static order {order_id} is ready");
            state.remove_order(order_id);
            move_resource_to_idle(state, resource, now);
        }
    }
    true
}

/// A scheduler gave a resource back.
pub(crate) async fn release_resource(state: &mut InfraState, resource: Resource, now: SystemTime) {
    let Some(allocation) = state.pool_mut().deallocate(resource.id()) else {
        if state.pool().is_idle(resource.id()) {
            log::debug!("Resource {resource} is already idle");
        } else {
            log::warn!("Released resource {resource} is not allocated");
        }
        return;
    };
    if let Some(order_id) = allocation.order {
        state.remove_order(order_id);
    }

    let mut resource = allocation.resource;
    resource.set_state(ResourceState::Idle);
    resource.increment_reuse_count();

    let reuse_exhausted = state
        .config()
        .max_resource_reuse
        .is_some_and(|max_reuse| resource.reuse_count() >= max_reuse);
    if reuse_exhausted && !resource.is_persistent() {
        log::info!(
            "Resource {resource} served {} tasks, disposing",
            resource.reuse_count()
        );
        dispose_resource(state, resource, now).await;
        return;
    }

    // An unhealthy resource is left to the health check of the idle pool.
    let resource = match revalidate(state, resource.clone()).await {
        Some(resource) => resource,
        None => {
            log::debug!("Released resource {resource} failed validation");
            move_resource_to_idle(state, resource, now);
            return;
        }
    };
    let waiting = state
        .orders()
        .iter()
        .find(|order| {
            order.is_pending() && order.scheduler().is_some() && resource.matches(order.spec())
        })
        .map(|order| order.id());
    match waiting {
        Some(order_id) => hand_over(state, resource, order_id, now),
        None => move_resource_to_idle(state, resource, now),
    }
}

/// Fulfils a pending order with a released resource. If the order already has an outstanding
/// request, the request is kept as a static order, so its resource ends up idle.
fn hand_over(state: &mut InfraState, resource: Resource, order_id: OrderId, now: SystemTime) {
    let detached = state.get_order_mut(order_id).and_then(|order| {
        if order.state() == OrderState::Ordered {
            order
                .take_request_id()
                .map(|request_id| (request_id, order.spec().clone()))
        } else {
            None
        }
    });
    if let Some((request_id, spec)) = detached {
        keep_request_as_static_order(state, request_id, spec);
    }
    log::debug!("Released resource {resource} goes directly to order {order_id}");
    state.pool_mut().allocate(resource.clone(), Some(order_id));
    fulfil_order(state, resource, order_id, now);
}

fn keep_request_as_static_order(state: &mut InfraState, request_id: RequestId, spec: Specification) {
    let id = state.create_order(spec, OrderOwner::StaticPool);
    log::debug!("Request {request_id} continues as static order {id}");
    if let Some(order) = state.get_order_mut(id) {
        order.mark_ordered(request_id);
    }
}

fn move_resource_to_idle(state: &mut InfraState, mut resource: Resource, now: SystemTime) {
    resource.set_state(ResourceState::Idle);
    let expiration = state.idle_expiration(resource.is_persistent(), now);
    log::debug!("Resource {resource} is idle, expiration: {expiration:?}");
    state.pool_mut().park_idle(resource, expiration);
}

/// Health and eviction pass over the idle pool.
pub(crate) async fn check_idle_resources(state: &mut InfraState, now: SystemTime) {
    let entries: Vec<IdleEntry> = state.pool().idle().to_vec();
    for IdleEntry {
        resource,
        expiration,
    } in entries
    {
        if resource.is_persistent() {
            if !state.connectivity().is_reachable(&resource).await {
                refresh_idle_resource(state, &resource).await;
            }
            continue;
        }

        let evict = if state.config().elastic && expiration.is_expired(now) {
            log::info!("Idle resource {resource} expired");
            true
        } else if !state.connectivity().is_reachable(&resource).await {
            log::info!("Idle resource {resource} is not reachable");
            true
        } else {
            false
        };
        if !evict {
            continue;
        }
        if let Some(entry) = state.pool_mut().take_idle(resource.id()) {
            dispose_resource(state, entry.resource, now).await;
        }
    }
    state.persist();
}

/// Health pass over resources granted to schedulers.
///
/// A resource the provider no longer knows is taken out of the pool and reported lost. A
/// resource that cannot be reached is reported unreachable, its scheduler gives it back.
pub(crate) async fn check_allocated_resources(state: &mut InfraState) {
    let allocated: Vec<(Resource, SchedulerHandle)> = state
        .pool()
        .allocated()
        .filter_map(|allocation| {
            let handle = state.get_order(allocation.order?)?.scheduler()?;
            Some((allocation.resource.clone(), handle.clone()))
        })
        .collect();
    for (resource, handle) in allocated {
        let fut = state.provider().get_resource(resource.request_id());
        if let Err(InfrastructureError::NotFound(_)) = fut.await {
            log::warn!("Resource {resource} of {handle:?} has disappeared");
            if let Some(order_id) = state
                .pool_mut()
                .deallocate(resource.id())
                .and_then(|allocation| allocation.order)
            {
                state.remove_order(order_id);
            }
            handle.resource_lost(resource.id().to_string());
            continue;
        }
        if !state.connectivity().is_reachable(&resource).await {
            log::warn!("Resource {resource} of {handle:?} is not reachable");
            handle.resource_unreachable(resource.id().to_string());
        }
    }
    state.persist();
}

async fn refresh_idle_resource(state: &mut InfraState, resource: &Resource) {
    let fut = state.provider().get_resource(resource.request_id());
    match fut.await {
        Ok(Some(fresh)) => {
            if let Some(entry) = state.pool_mut().get_idle_mut(resource.id()) {
                entry.resource.copy_information(&fresh);
                log::debug!("Persistent resource {} refreshed", entry.resource);
            }
        }
        Ok(None) => log::debug!("Persistent resource {resource} is not available"),
        Err(error) => log::warn!("Cannot refresh persistent resource {resource}: {error}"),
    }
}

/// Deletes a resource at the provider. If the deletion fails, the resource is parked as
/// already expired, so the deletion is retried by the next health pass.
async fn dispose_resource(state: &mut InfraState, resource: Resource, now: SystemTime) {
    let fut = state.provider().delete_resource(resource.id());
    match fut.await {
        Ok(()) => log::info!("Resource {resource} deleted"),
        Err(InfrastructureError::NotFound(_)) => {
            log::debug!("Resource {resource} was already gone");
        }
        Err(error) => {
            log::warn!("Cannot delete resource {resource}: {error}");
            state.pool_mut().park_idle(resource, Expiration::At(now));
        }
    }
}

/// Makes the scheduler have exactly `count` pending orders for `spec`. Surplus orders are
/// withdrawn newest first, outstanding requests are never cancelled.
pub(crate) async fn ensure_demand(
    state: &mut InfraState,
    spec: Specification,
    count: usize,
    scheduler: SchedulerHandle,
    now: SystemTime,
) {
    let pending = state.pending_orders_of(scheduler.id(), &spec);
    if pending.len() < count {
        for _ in pending.len()..count {
            order_resource(state, spec.clone(), scheduler.clone(), now).await;
        }
    } else if pending.len() > count {
        let surplus: Vec<OrderId> = pending
            .iter()
            .rev()
            .copied()
            .filter(|id| {
                state
                    .get_order(*id)
                    .is_some_and(|order| order.state() == OrderState::Open)
            })
            .take(pending.len() - count)
            .collect();
        for id in surplus {
            state.remove_order(id);
            log::debug!("Order {id} withdrawn, {count} wanted by {scheduler:?}");
        }
    }
}

/// Removes pending orders of a scheduler. Outstanding requests continue as static orders.
pub(crate) fn withdraw_orders(state: &mut InfraState, scheduler: SchedulerId) {
    let ids: Vec<OrderId> = state
        .orders()
        .iter()
        .filter(|order| order.is_pending() && order.owner().scheduler_id() == Some(scheduler))
        .map(|order| order.id())
        .collect();
    for id in ids {
        let Some(mut order) = state.remove_order(id) else {
            continue;
        };
        log::debug!("Order {id} of scheduler {scheduler} withdrawn");
        if order.state() != OrderState::Ordered {
            continue;
        }
        if let Some(request_id) = order.take_request_id() {
            keep_request_as_static_order(state, request_id, order.spec().clone());
        }
    }
}

async fn delete_all(state: &InfraState, ids: Vec<String>) {
    if ids.is_empty() {
        return;
    }
    let futures: Vec<_> = ids
        .iter()
        .map(|id| state.provider().delete_resource(id))
        .collect();
    let results = join_all(futures).await;
    for (id, result) in ids.iter().zip(results) {
        match result {
            Ok(()) => log::debug!("Deleted {id}"),
            Err(InfrastructureError::NotFound(_)) => log::debug!("{id} was already gone"),
            Err(error) => log::warn!("Cannot delete {id}: {error}"),
        }
    }
}

/// Cleans up after a previous run and orders the initial resources.
pub(crate) async fn start(state: &mut InfraState, now: SystemTime) {
    match state.store_mut().recover_request_ids() {
        Ok(ids) => {
            if !ids.is_empty() {
                log::info!("Deleting {} resources left over by a previous run", ids.len());
            }
            delete_all(state, ids).await;
        }
        Err(error) => log::warn!("Cannot recover previous infrastructure state: {error}"),
    }
    if let Err(error) = state.store_mut().clear() {
        log::warn!("Cannot clear infrastructure state: {error}");
    }

    let specs = state.config().initial_specs.clone();
    for spec in specs {
        let id = state.create_order(spec, OrderOwner::StaticPool);
        log::debug!("Initial order {id} created");
        resolve_open_order(state, id, now).await;
    }
    state.persist();
}

/// Deletes outstanding requests and every tracked resource.
pub(crate) async fn stop(state: &mut InfraState) {
    let mut ids: Vec<String> = state
        .clear_orders()
        .into_iter()
        .filter(|order| order.state() == OrderState::Ordered)
        .filter_map(|mut order| order.take_request_id())
        .collect();
    ids.extend(
        state
            .pool_mut()
            .drain()
            .into_iter()
            .map(|resource| resource.id().to_string()),
    );
    log::info!("Deleting {} resources and requests", ids.len());
    delete_all(state, ids).await;
    if let Err(error) = state.store_mut().clear() {
        log::warn!("Cannot clear infrastructure state: {error}");
    }
}
