use std::future::Future;

use crate::common::rpc::{initiate_request, make_rpc_queue, ResponseToken, RpcSender};
use crate::infra::config::InfrastructureConfig;
use crate::infra::connectivity::ConnectivityCheck;
use crate::infra::process::infra_manager_process;
use crate::infra::provider::InfrastructureProvider;
use crate::infra::state::{InfraSnapshot, InfraState};
use crate::infra::store::InfrastructureStore;
use crate::resource::Resource;
use crate::scheduler::service::SchedulerHandle;
use crate::specification::Specification;
use crate::{Error, SchedulerId};

#[derive(Debug)]
pub enum InfraMessage {
    OrderResource {
        spec: Specification,
        scheduler: SchedulerHandle,
    },
    EnsureDemand {
        spec: Specification,
        count: usize,
        scheduler: SchedulerHandle,
    },
    ReleaseResource(Resource),
    WithdrawOrders(SchedulerId),
    WaitForInitialResources(ResponseToken<()>),
    GetSnapshot(ResponseToken<InfraSnapshot>),
    Stop(ResponseToken<()>),
}

/// Access point of the infrastructure manager.
#[derive(Clone)]
pub struct InfraManagerService {
    sender: RpcSender<InfraMessage>,
}

impl InfraManagerService {
    pub(crate) fn new(sender: RpcSender<InfraMessage>) -> Self {
        Self { sender }
    }

    /// Creates a new order for `spec` owned by `scheduler`. Never fails, an order that cannot
    /// be provisioned stays open.
    pub fn order_resource(&self, spec: Specification, scheduler: SchedulerHandle) {
        self.send(InfraMessage::OrderResource { spec, scheduler });
    }

    /// Makes sure that `scheduler` has exactly `count` pending orders for `spec`.
    pub fn ensure_demand(&self, spec: Specification, count: usize, scheduler: SchedulerHandle) {
        self.send(InfraMessage::EnsureDemand {
            spec,
            count,
            scheduler,
        });
    }

    pub fn release_resource(&self, resource: Resource) {
        self.send(InfraMessage::ReleaseResource(resource));
    }

    pub fn withdraw_orders(&self, scheduler: SchedulerId) {
        self.send(InfraMessage::WithdrawOrders(scheduler));
    }

    /// Resolves once every initial specification has an idle resource.
    pub fn wait_for_initial_resources(&self) -> impl Future<Output = crate::Result<()>> {
        let fut = initiate_request(|token| {
            self.sender
                .send(InfraMessage::WaitForInitialResources(token))
        });
        async move { fut.await.map_err(|_| manager_stopped()) }
    }

    pub fn snapshot(&self) -> impl Future<Output = crate::Result<InfraSnapshot>> {
        let fut = initiate_request(|token| self.sender.send(InfraMessage::GetSnapshot(token)));
        async move { fut.await.map_err(|_| manager_stopped()) }
    }

    /// Deletes every tracked resource and ends the manager.
    pub fn stop(&self) -> impl Future<Output = crate::Result<()>> {
        let fut = initiate_request(|token| self.sender.send(InfraMessage::Stop(token)));
        async move { fut.await.map_err(|_| manager_stopped()) }
    }

    fn send(&self, message: InfraMessage) {
        if self.sender.send(message).is_err() {
            log::warn!("Infrastructure manager is not running, message dropped");
        }
    }
}

fn manager_stopped() -> Error {
    Error::GenericError("Infrastructure manager has stopped".to_string())
}

/// Creates the infrastructure manager. The returned future has to be polled (on a
/// `LocalSet`) for the manager to do anything.
pub fn create_infra_manager(
    config: InfrastructureConfig,
    provider: Box<dyn InfrastructureProvider>,
    connectivity: Box<dyn ConnectivityCheck>,
    store: Box<dyn InfrastructureStore>,
) -> (InfraManagerService, impl Future<Output = ()>) {
    let (tx, rx) = make_rpc_queue();
    let state = InfraState::new(config, provider, connectivity, store);
    let process = infra_manager_process(state, rx);
    (InfraManagerService::new(tx), process)
}
