use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::Arc;

use crate::common::rpc::{initiate_request, make_rpc_queue, ResponseToken, RpcSender};
use crate::infra::service::InfraManagerService;
use crate::job::Job;
use crate::resource::Resource;
use crate::scheduler::monitor::TaskMonitor;
use crate::scheduler::process::scheduler_process;
use crate::scheduler::{Scheduler, SchedulerConfig, SchedulerStatus};
use crate::{Error, JobId, ResourceId, SchedulerId, TaskId};

pub enum SchedulerMessage {
    /// The infrastructure manager granted a resource to this scheduler.
    ResourceReady(Resource),
    TaskCompleted(TaskId),
    TaskFailed(TaskId, String),
    /// The resource disappeared together with whatever ran on it.
    ResourceLost(ResourceId),
    ResourceUnreachable(ResourceId),
    AddJob(Arc<Job>),
    RemoveJob(JobId, ResponseToken<Option<Arc<Job>>>),
    GetStatus(ResponseToken<SchedulerStatus>),
    Stop(ResponseToken<()>),
}

impl Debug for SchedulerMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerMessage::ResourceReady(resource) => write!(f, "ResourceReady({resource})"),
            SchedulerMessage::TaskCompleted(id) => write!(f, "TaskCompleted({id})"),
            SchedulerMessage::TaskFailed(id, reason) => write!(f, "TaskFailed({id}, {reason})"),
            SchedulerMessage::ResourceLost(id) => write!(f, "ResourceLost({id})"),
            SchedulerMessage::ResourceUnreachable(id) => write!(f, "ResourceUnreachable({id})"),
            SchedulerMessage::AddJob(job) => write!(f, "AddJob({})", job.id()),
            SchedulerMessage::RemoveJob(id, _) => write!(f, "RemoveJob({id})"),
            SchedulerMessage::GetStatus(_) => f.write_str("GetStatus"),
            SchedulerMessage::Stop(_) => f.write_str("Stop"),
        }
    }
}

/// Sending side of a scheduler, handed to the infrastructure manager and task monitors.
#[derive(Clone)]
pub struct SchedulerHandle {
    id: SchedulerId,
    sender: RpcSender<SchedulerMessage>,
}

impl SchedulerHandle {
    pub(crate) fn new(id: SchedulerId, sender: RpcSender<SchedulerMessage>) -> Self {
        Self { id, sender }
    }

    #[inline]
    pub fn id(&self) -> SchedulerId {
        self.id
    }

    /// Returns `false` if the scheduler is no longer running.
    pub fn resource_ready(&self, resource: Resource) -> bool {
        self.sender
            .send(SchedulerMessage::ResourceReady(resource))
            .is_ok()
    }

    pub fn task_completed(&self, task_id: TaskId) {
        self.send(SchedulerMessage::TaskCompleted(task_id));
    }

    pub fn task_failed(&self, task_id: TaskId, reason: String) {
        self.send(SchedulerMessage::TaskFailed(task_id, reason));
    }

    pub fn resource_lost(&self, resource_id: ResourceId) {
        self.send(SchedulerMessage::ResourceLost(resource_id));
    }

    pub fn resource_unreachable(&self, resource_id: ResourceId) {
        self.send(SchedulerMessage::ResourceUnreachable(resource_id));
    }

    fn send(&self, message: SchedulerMessage) {
        if let Err(error) = self.sender.send(message) {
            log::debug!("Scheduler {} is gone, dropping {:?}", self.id, error.0);
        }
    }
}

impl PartialEq for SchedulerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Debug for SchedulerHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "scheduler {}", self.id)
    }
}

#[derive(Clone)]
pub struct SchedulerService {
    sender: RpcSender<SchedulerMessage>,
}

impl SchedulerService {
    pub fn add_job(&self, job: Arc<Job>) {
        if self.sender.send(SchedulerMessage::AddJob(job)).is_err() {
            log::warn!("Scheduler is not running, job dropped");
        }
    }

    /// Stops the running tasks of the job and forgets it.
    pub fn remove_job(&self, job_id: JobId) -> impl Future<Output = crate::Result<Option<Arc<Job>>>> {
        let fut = initiate_request(|token| {
            self.sender.send(SchedulerMessage::RemoveJob(job_id, token))
        });
        async move { fut.await.map_err(|_| scheduler_stopped()) }
    }

    pub fn status(&self) -> impl Future<Output = crate::Result<SchedulerStatus>> {
        let fut = initiate_request(|token| self.sender.send(SchedulerMessage::GetStatus(token)));
        async move { fut.await.map_err(|_| scheduler_stopped()) }
    }

    /// Stops every running task, releases the resources and withdraws pending orders.
    pub fn stop(&self) -> impl Future<Output = crate::Result<()>> {
        let fut = initiate_request(|token| self.sender.send(SchedulerMessage::Stop(token)));
        async move { fut.await.map_err(|_| scheduler_stopped()) }
    }
}

fn scheduler_stopped() -> Error {
    Error::GenericError("Scheduler has stopped".to_string())
}

/// Creates a scheduler. `create_monitor` receives the handle through which the monitor
/// reports task outcomes. The returned future has to be polled on a `LocalSet`.
pub fn create_scheduler_service<F>(
    id: SchedulerId,
    config: SchedulerConfig,
    infra: InfraManagerService,
    create_monitor: F,
) -> (SchedulerService, impl Future<Output = ()>)
where
    F: FnOnce(SchedulerHandle) -> Box<dyn TaskMonitor>,
{
    let (tx, rx) = make_rpc_queue();
    let handle = SchedulerHandle::new(id, tx.clone());
    let monitor = create_monitor(handle.clone());
    let scheduler = Scheduler::new(handle, config, infra, monitor);
    let process = scheduler_process(scheduler, rx);
    (SchedulerService { sender: tx }, process)
}
