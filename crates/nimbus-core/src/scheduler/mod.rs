pub mod monitor;
pub mod process;
pub mod service;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::timeutils::deserialize_human_duration_opt;
use crate::infra::config::ConfigError;
use crate::infra::service::InfraManagerService;
use crate::job::{Job, JobCounters, Task, TaskState};
use crate::resource::{Resource, ResourceState};
use crate::scheduler::monitor::TaskMonitor;
use crate::scheduler::service::SchedulerHandle;
use crate::specification::Specification;
use crate::{JobId, Map, ResourceId, Set, TaskId};

pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(1);

/// `[scheduler]` table as written by the user.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SchedulerConfigDef {
    #[serde(default, deserialize_with = "deserialize_human_duration_opt")]
    pub tick_period: Option<Duration>,
    #[serde(default)]
    pub max_task_retries: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_period: Duration,
    /// How many times a failed task may be retried. Unlimited if not set.
    pub max_task_retries: Option<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_period: DEFAULT_TICK_PERIOD,
            max_task_retries: None,
        }
    }
}

impl SchedulerConfig {
    pub fn from_def(def: SchedulerConfigDef) -> Result<Self, ConfigError> {
        let tick_period = def.tick_period.unwrap_or(DEFAULT_TICK_PERIOD);
        if tick_period.is_zero() {
            return Err(ConfigError::ZeroValue("tick-period"));
        }
        Ok(Self {
            tick_period,
            max_task_retries: def.max_task_retries,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: JobId,
    pub name: String,
    pub counters: JobCounters,
    pub finished: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub jobs: Vec<JobStatus>,
    pub resources: usize,
    pub running_tasks: usize,
}

impl SchedulerStatus {
    pub fn all_finished(&self) -> bool {
        self.jobs.iter().all(|job| job.finished)
    }
}

/// Can `task` run on `resource`?
fn can_run(resource: &Resource, task: &Task) -> bool {
    resource.spec() == task.spec() || resource.matches(task.spec())
}

/// Binds ready tasks of its jobs to resources granted by the infrastructure manager.
pub struct Scheduler {
    handle: SchedulerHandle,
    config: SchedulerConfig,
    infra: InfraManagerService,
    monitor: Box<dyn TaskMonitor>,
    jobs: Vec<Arc<Job>>,
    /// Resources granted to this scheduler, in the order in which they arrived.
    resources: Vec<Resource>,
    /// Task running on a resource.
    bindings: Map<ResourceId, TaskId>,
    /// Specifications for which orders were placed by the last demand update.
    demanded: Set<Specification>,
}

impl Scheduler {
    pub fn new(
        handle: SchedulerHandle,
        config: SchedulerConfig,
        infra: InfraManagerService,
        monitor: Box<dyn TaskMonitor>,
    ) -> Self {
        Self {
            handle,
            config,
            infra,
            monitor,
            jobs: Default::default(),
            resources: Default::default(),
            bindings: Default::default(),
            demanded: Default::default(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn handle(&self) -> &SchedulerHandle {
        &self.handle
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn running_task_on(&self, resource_id: &str) -> Option<TaskId> {
        self.bindings.get(resource_id).copied()
    }

    pub fn add_job(&mut self, job: Arc<Job>) {
        if self.find_job(job.id()).is_some() {
            log::warn!("Job {} is already scheduled", job.id());
            return;
        }
        log::info!("Job {} ({}) added", job.id(), job.name());
        self.jobs.push(job);
    }

    /// Stops the running tasks of a job, releases their resources and forgets the job.
    pub fn remove_job(&mut self, job_id: JobId) -> Option<Arc<Job>> {
        let index = self.jobs.iter().position(|job| job.id() == job_id)?;
        let task_ids: Vec<TaskId> = self
            .bindings
            .values()
            .copied()
            .filter(|task_id| task_id.job_id() == job_id)
            .collect();
        let freed = self.stop_tasks(&task_ids);
        for resource_id in freed {
            self.release(&resource_id);
        }
        log::info!("Job {job_id} removed");
        Some(self.jobs.remove(index))
    }

    fn find_job(&self, job_id: JobId) -> Option<&Arc<Job>> {
        self.jobs.iter().find(|job| job.id() == job_id)
    }

    fn resource(&self, resource_id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id() == resource_id)
    }

    fn resource_mut(&mut self, resource_id: &str) -> Option<&mut Resource> {
        self.resources.iter_mut().find(|r| r.id() == resource_id)
    }

    fn is_running(&self, task_id: TaskId) -> bool {
        self.bindings.values().any(|bound| *bound == task_id)
    }

    fn bound_resource_of(&self, task_id: TaskId) -> Option<ResourceId> {
        self.bindings
            .iter()
            .find(|(_, bound)| **bound == task_id)
            .map(|(resource_id, _)| resource_id.clone())
    }

    /// Ready and running tasks of all jobs, ready tasks in scheduling order.
    fn task_pool(&self) -> Vec<Task> {
        self.jobs
            .iter()
            .flat_map(|job| {
                let mut tasks = job.get_by_state(TaskState::Ready);
                tasks.extend(job.get_by_state(TaskState::Running));
                tasks
            })
            .collect()
    }

    /// One scheduling pass over the current tasks and resources.
    pub fn act(&mut self) {
        let tasks = self.task_pool();

        // Running tasks that were withdrawn from their job
        let withdrawn: Vec<TaskId> = self
            .bindings
            .values()
            .copied()
            .filter(|task_id| !tasks.iter().any(|task| task.id() == *task_id))
            .collect();
        if !withdrawn.is_empty() {
            log::debug!("Stopping withdrawn tasks {withdrawn:?}");
            self.stop_tasks(&withdrawn);
        }

        // Idle resources get the first ready task they can run
        let idle: Vec<ResourceId> = self
            .resources
            .iter()
            .filter(|r| r.state() == ResourceState::Idle)
            .map(|r| r.id().to_string())
            .collect();
        for resource_id in idle {
            let candidate = self.resource(&resource_id).and_then(|resource| {
                tasks
                    .iter()
                    .filter(|task| task.state() == TaskState::Ready)
                    .find(|task| can_run(resource, task) && !self.is_running(task.id()))
                    .map(|task| task.id())
            });
            if let Some(task_id) = candidate {
                self.run_task(&resource_id, task_id);
            }
        }

        // Resources that have to be given up lose their task
        let to_remove: Vec<ResourceId> = self
            .resources
            .iter()
            .filter(|r| r.state() == ResourceState::ToRemove)
            .map(|r| r.id().to_string())
            .collect();
        for resource_id in to_remove {
            if let Some(task_id) = self.bindings.remove(&resource_id) {
                self.monitor.stop_task(task_id);
                self.fail_task(task_id, "resource has to be removed");
            }
            self.release(&resource_id);
        }

        // Resources that disappeared lose their task
        let lost: Vec<(ResourceId, TaskId)> = self
            .bindings
            .iter()
            .filter(|(resource_id, _)| self.resource(resource_id).is_none())
            .map(|(resource_id, task_id)| (resource_id.clone(), *task_id))
            .collect();
        for (resource_id, task_id) in lost {
            self.bindings.remove(&resource_id);
            self.monitor.stop_task(task_id);
            self.fail_task(task_id, "resource was lost");
        }
    }

    fn run_task(&mut self, resource_id: &str, task_id: TaskId) -> bool {
        if self.resource(resource_id).is_none() {
            return false;
        }
        if let Some(bound) = self.bindings.get(resource_id) {
            log::warn!(
                "Resource {resource_id} already runs task {bound}, not binding {task_id}"
            );
            return false;
        }
        let Some(job) = self.find_job(task_id.job_id()).cloned() else {
            return false;
        };
        let Some(task) = job.run(task_id) else {
            log::debug!("Task {task_id} is no longer ready");
            return false;
        };
        let Some(resource) = self.resource_mut(resource_id) else {
            return false;
        };
        resource.set_state(ResourceState::Allocated);
        let resource = resource.clone();
        self.bindings.insert(resource.id().to_string(), task_id);
        log::info!(
            "Task {task_id} runs on {resource} (attempt {})",
            task.retries()
        );
        self.monitor.run_task(&task, &resource);
        true
    }

    /// Marks a running task as failed and schedules its clone, unless it ran out of retries.
    fn fail_task(&mut self, task_id: TaskId, reason: &str) {
        let Some(job) = self.find_job(task_id.job_id()) else {
            return;
        };
        if !job.fail(task_id) {
            log::debug!("Task {task_id} is not running, failure ignored");
            return;
        }
        let attempts = job.get_task(task_id).map(|task| task.retries()).unwrap_or(0);
        match self.config.max_task_retries {
            Some(max_retries) if attempts > max_retries => {
                log::warn!("Task {task_id} failed ({reason}) after {attempts} attempts, giving up");
            }
            _ => {
                if let Some(clone_id) = job.recover_task(task_id) {
                    log::info!("Task {task_id} failed ({reason}), retrying as {clone_id}");
                }
            }
        }
    }

    /// Gives a resource back to the infrastructure manager.
    fn release(&mut self, resource_id: &str) {
        let Some(index) = self.resources.iter().position(|r| r.id() == resource_id) else {
            return;
        };
        let resource = self.resources.remove(index);
        if let Some(task_id) = self.bindings.remove(resource_id) {
            log::warn!("Releasing {resource} while task {task_id} is bound to it");
        }
        log::debug!("Releasing resource {resource}");
        self.infra.release_resource(resource);
    }

    /// A resource was granted by the infrastructure manager.
    pub fn resource_ready(&mut self, mut resource: Resource) {
        if self.resources.iter().any(|r| r.id() == resource.id()) {
            log::warn!("Resource {resource} was granted twice");
            return;
        }
        resource.set_state(ResourceState::Idle);
        if let Some(task_id) = self.bindings.remove(resource.id()) {
            self.monitor.stop_task(task_id);
            self.fail_task(task_id, "resource was lost");
        }
        let candidate = self
            .task_pool()
            .into_iter()
            .filter(|task| task.state() == TaskState::Ready)
            .find(|task| can_run(&resource, task))
            .map(|task| task.id());

        let resource_id = resource.id().to_string();
        self.resources.push(resource);
        match candidate {
            Some(task_id) => {
                self.run_task(&resource_id, task_id);
            }
            None => {
                log::debug!("No ready task for resource {resource_id}");
                self.release(&resource_id);
            }
        }
    }

    pub fn task_completed(&mut self, task_id: TaskId) {
        let Some(resource_id) = self.bound_resource_of(task_id) else {
            log::debug!("Completed task {task_id} is not bound to any resource");
            return;
        };
        self.bindings.remove(&resource_id);
        if let Some(job) = self.find_job(task_id.job_id()) {
            job.finish(task_id);
        }
        log::info!("Task {task_id} completed");
        self.release(&resource_id);
    }

    pub fn task_failed(&mut self, task_id: TaskId, reason: &str) {
        let Some(resource_id) = self.bound_resource_of(task_id) else {
            log::debug!("Failed task {task_id} is not bound to any resource");
            return;
        };
        self.bindings.remove(&resource_id);
        self.fail_task(task_id, reason);
        self.release(&resource_id);
    }

    /// The resource is gone together with its task. The task is failed and recovered.
    pub fn resource_lost(&mut self, resource_id: &str) {
        if let Some(task_id) = self.bindings.remove(resource_id) {
            self.monitor.stop_task(task_id);
            self.fail_task(task_id, "resource was lost");
        }
        if let Some(index) = self.resources.iter().position(|r| r.id() == resource_id) {
            let resource = self.resources.remove(index);
            log::warn!("Resource {resource} was lost");
            self.infra.release_resource(resource);
        }
    }

    pub fn resource_unreachable(&mut self, resource_id: &str) {
        if let Some(resource) = self.resource_mut(resource_id) {
            log::warn!("Resource {resource} is unreachable");
            resource.set_state(ResourceState::ToRemove);
        }
    }

    /// Aborts a running task. Its resource stays granted and becomes idle.
    ///
    /// Returns the resource the task was bound to.
    pub fn stop_task(&mut self, task_id: TaskId) -> Option<ResourceId> {
        let resource_id = self.bound_resource_of(task_id)?;
        self.monitor.stop_task(task_id);
        self.bindings.remove(&resource_id);
        if let Some(resource) = self.resource_mut(&resource_id) {
            resource.set_state(ResourceState::Idle);
        }
        Some(resource_id)
    }

    pub fn stop_tasks(&mut self, task_ids: &[TaskId]) -> Vec<ResourceId> {
        let bound: Vec<(ResourceId, TaskId)> = task_ids
            .iter()
            .filter_map(|task_id| {
                self.bound_resource_of(*task_id)
                    .map(|resource_id| (resource_id, *task_id))
            })
            .collect();
        let stopped: Vec<TaskId> = bound.iter().map(|(_, task_id)| *task_id).collect();
        self.monitor.stop_tasks(&stopped);
        bound
            .into_iter()
            .map(|(resource_id, _)| {
                self.bindings.remove(&resource_id);
                if let Some(resource) = self.resource_mut(&resource_id) {
                    resource.set_state(ResourceState::Idle);
                }
                resource_id
            })
            .collect()
    }

    /// Releases granted resources that have nothing to run.
    fn release_unused_resources(&mut self) {
        let unused: Vec<ResourceId> = self
            .resources
            .iter()
            .filter(|r| r.state() == ResourceState::Idle && !self.bindings.contains_key(r.id()))
            .map(|r| r.id().to_string())
            .collect();
        for resource_id in unused {
            self.release(&resource_id);
        }
    }

    /// Asks the infrastructure manager for one resource per ready task and specification.
    fn update_demand(&mut self) {
        let mut demand: Map<Specification, usize> = Map::new();
        for task in self.task_pool() {
            if task.state() == TaskState::Ready {
                *demand.entry(task.spec().clone()).or_default() += 1;
            }
        }
        for spec in self.demanded.iter() {
            if !demand.contains_key(spec) {
                self.infra.ensure_demand(spec.clone(), 0, self.handle.clone());
            }
        }
        for (spec, count) in demand.iter() {
            self.infra
                .ensure_demand(spec.clone(), *count, self.handle.clone());
        }
        self.demanded = demand.keys().cloned().collect();
    }

    pub fn tick(&mut self) {
        self.act();
        self.release_unused_resources();
        self.update_demand();
    }

    /// Stops everything that runs, gives all resources back and withdraws pending orders.
    pub fn stop(&mut self) {
        let running: Vec<TaskId> = self.bindings.values().copied().collect();
        self.stop_tasks(&running);
        let resources: Vec<ResourceId> = self.resources.iter().map(|r| r.id().to_string()).collect();
        for resource_id in resources {
            self.release(&resource_id);
        }
        self.infra.withdraw_orders(self.handle.id());
        self.demanded.clear();
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            jobs: self
                .jobs
                .iter()
                .map(|job| JobStatus {
                    id: job.id(),
                    name: job.name().to_string(),
                    counters: job.counters(),
                    finished: job.is_finished(),
                })
                .collect(),
            resources: self.resources.len(),
            running_tasks: self.bindings.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Scheduler, SchedulerConfig};
    use crate::common::rpc::{make_rpc_queue, RpcReceiver};
    use crate::infra::service::{InfraManagerService, InfraMessage};
    use crate::job::{Job, TaskState};
    use crate::resource::{Resource, ResourceState};
    use crate::scheduler::monitor::{TaskExecutionState, TaskMonitor};
    use crate::scheduler::service::SchedulerHandle;
    use crate::specification::Specification;
    use crate::{JobId, ResourceId, SchedulerId, TaskId, WrappedRcRefCell};

    #[derive(Default)]
    struct MonitorLog {
        runs: Vec<(TaskId, ResourceId)>,
        stopped: Vec<TaskId>,
    }

    struct RecordingMonitor(WrappedRcRefCell<MonitorLog>);

    impl TaskMonitor for RecordingMonitor {
        fn run_task(&mut self, task: &crate::job::Task, resource: &Resource) {
            self.0
                .get_mut()
                .runs
                .push((task.id(), resource.id().to_string()));
        }

        fn stop_task(&mut self, task_id: TaskId) {
            self.0.get_mut().stopped.push(task_id);
        }

        fn get_task_state(&self, task_id: TaskId) -> TaskExecutionState {
            let log = self.0.get();
            if log.runs.iter().any(|(id, _)| *id == task_id) {
                TaskExecutionState::Running
            } else {
                TaskExecutionState::NotCreated
            }
        }
    }

    struct TestCtx {
        scheduler: Scheduler,
        monitor: WrappedRcRefCell<MonitorLog>,
        infra: RpcReceiver<InfraMessage>,
    }

    impl TestCtx {
        fn new(config: SchedulerConfig) -> Self {
            let (scheduler_tx, _) = make_rpc_queue();
            let (infra_tx, infra) = make_rpc_queue();
            let monitor = WrappedRcRefCell::wrap(MonitorLog::default());
            let scheduler = Scheduler::new(
                SchedulerHandle::new(SchedulerId::new(1), scheduler_tx),
                config,
                InfraManagerService::new(infra_tx),
                Box::new(RecordingMonitor(monitor.clone())),
            );
            Self {
                scheduler,
                monitor,
                infra,
            }
        }

        fn add_job(&mut self, specs: &[Specification]) -> (Arc<Job>, Vec<TaskId>) {
            let job = Arc::new(Job::new(JobId::new(1), "job"));
            let ids = specs
                .iter()
                .map(|spec| job.add_task(spec.clone(), vec!["true".to_string()]))
                .collect();
            self.scheduler.add_job(job.clone());
            (job, ids)
        }

        fn runs(&self) -> Vec<(TaskId, ResourceId)> {
            self.monitor.get().runs.clone()
        }

        fn stopped(&self) -> Vec<TaskId> {
            self.monitor.get().stopped.clone()
        }

        fn released(&mut self) -> Vec<ResourceId> {
            self.infra_messages()
                .into_iter()
                .filter_map(|message| match message {
                    InfraMessage::ReleaseResource(resource) => Some(resource.id().to_string()),
                    _ => None,
                })
                .collect()
        }

        fn infra_messages(&mut self) -> Vec<InfraMessage> {
            let mut messages = vec![];
            while let Ok(message) = self.infra.try_recv() {
                messages.push(message);
            }
            messages
        }
    }

    fn spec() -> Specification {
        Specification::new("ubuntu", "key")
    }

    fn other_spec() -> Specification {
        Specification::new("debian", "key")
    }

    fn resource(id: &str, spec: Specification) -> Resource {
        Resource::new(id, format!("req-{id}"), spec)
    }

    #[test]
    fn granted_resource_runs_ready_task() {
        let mut ctx = TestCtx::new(SchedulerConfig::default());
        let (job, ids) = ctx.add_job(&[spec()]);
        ctx.scheduler.resource_ready(resource("r1", spec()));

        assert_eq!(ctx.runs(), vec![(ids[0], "r1".to_string())]);
        let task = job.get_task(ids[0]).unwrap();
        assert_eq!(task.state(), TaskState::Running);
        assert_eq!(task.retries(), 1);
        assert_eq!(ctx.scheduler.resources()[0].state(), ResourceState::Allocated);
        assert_eq!(ctx.scheduler.running_task_on("r1"), Some(ids[0]));
        assert!(ctx.released().is_empty());
    }

    #[test]
    fn granted_resource_without_task_is_released() {
        let mut ctx = TestCtx::new(SchedulerConfig::default());
        ctx.add_job(&[other_spec()]);
        ctx.scheduler.resource_ready(resource("r1", spec()));
        assert!(ctx.runs().is_empty());
        assert_eq!(ctx.released(), vec!["r1"]);
        assert!(ctx.scheduler.resources().is_empty());
    }

    #[test]
    fn completed_task_releases_resource() {
        let mut ctx = TestCtx::new(SchedulerConfig::default());
        let (job, ids) = ctx.add_job(&[spec()]);
        ctx.scheduler.resource_ready(resource("r1", spec()));
        ctx.scheduler.task_completed(ids[0]);

        assert_eq!(job.get_task(ids[0]).unwrap().state(), TaskState::Completed);
        assert_eq!(ctx.released(), vec!["r1"]);
        assert!(job.is_finished());
        assert!(ctx.scheduler.status().all_finished());
    }

    #[test]
    fn failed_task_is_cloned_and_resource_released() {
        let mut ctx = TestCtx::new(SchedulerConfig::default());
        let (job, ids) = ctx.add_job(&[spec()]);
        ctx.scheduler.resource_ready(resource("r1", spec()));
        ctx.scheduler.task_failed(ids[0], "exit code 1");

        assert_eq!(job.get_task(ids[0]).unwrap().state(), TaskState::Failed);
        let ready = job.get_by_state(TaskState::Ready);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].origin(), Some(ids[0]));
        assert_eq!(ctx.released(), vec!["r1"]);
    }

    #[test]
    fn recovered_task_runs_before_fresh_tasks() {
        let mut ctx = TestCtx::new(SchedulerConfig::default());
        let (job, ids) = ctx.add_job(&[spec()]);
        ctx.scheduler.resource_ready(resource("r1", spec()));
        let t1 = job.add_task(spec(), vec![]);
        ctx.scheduler.task_failed(ids[0], "exit code 1");
        let clone = job.get_by_state(TaskState::Ready)[0].id();
        assert_eq!(
            job.get_by_state(TaskState::Ready)
                .iter()
                .map(|t| t.id())
                .collect::<Vec<_>>(),
            vec![clone, t1]
        );

        ctx.scheduler.resource_ready(resource("r2", spec()));
        assert_eq!(ctx.runs()[1], (clone, "r2".to_string()));
        assert_eq!(job.get_task(clone).unwrap().retries(), 2);
    }

    #[test]
    fn task_is_not_retried_beyond_limit() {
        let mut ctx = TestCtx::new(SchedulerConfig {
            max_task_retries: Some(1),
            ..Default::default()
        });
        let (job, ids) = ctx.add_job(&[spec()]);
        ctx.scheduler.resource_ready(resource("r1", spec()));
        ctx.scheduler.task_failed(ids[0], "first");
        let clone = job.get_by_state(TaskState::Ready)[0].id();

        ctx.scheduler.resource_ready(resource("r2", spec()));
        ctx.scheduler.task_failed(clone, "second");
        assert!(job.get_by_state(TaskState::Ready).is_empty());
        assert_eq!(job.get_by_state(TaskState::Failed).len(), 2);
        assert!(job.is_finished());
    }

    #[test]
    fn act_binds_idle_resources_by_specification() {
        let mut ctx = TestCtx::new(SchedulerConfig::default());
        ctx.scheduler.resource_ready(resource("r1", spec()));
        ctx.scheduler.resource_ready(resource("r2", other_spec()));
        assert_eq!(ctx.released(), vec!["r1", "r2"]);

        let (_, ids) = ctx.add_job(&[other_spec(), spec(), spec()]);
        // Idle resources left over from an earlier pass
        ctx.scheduler.resources.push(resource("r3", spec()));
        ctx.scheduler.resources.push(resource("r4", other_spec()));
        ctx.scheduler.resources.push(resource("r5", spec()));
        ctx.scheduler.act();

        assert_eq!(
            ctx.runs(),
            vec![
                (ids[1], "r3".to_string()),
                (ids[0], "r4".to_string()),
                (ids[2], "r5".to_string()),
            ]
        );
    }

    #[test]
    fn act_stops_withdrawn_task() {
        let mut ctx = TestCtx::new(SchedulerConfig::default());
        let (job, ids) = ctx.add_job(&[spec()]);
        ctx.scheduler.resource_ready(resource("r1", spec()));
        job.remove_task(ids[0]).unwrap();

        ctx.scheduler.act();
        assert_eq!(ctx.stopped(), vec![ids[0]]);
        assert_eq!(ctx.scheduler.running_task_on("r1"), None);
        assert_eq!(ctx.scheduler.resources()[0].state(), ResourceState::Idle);

        ctx.scheduler.tick();
        assert_eq!(ctx.released(), vec!["r1"]);
    }

    #[test]
    fn unreachable_resource_fails_its_task() {
        let mut ctx = TestCtx::new(SchedulerConfig::default());
        let (job, ids) = ctx.add_job(&[spec()]);
        ctx.scheduler.resource_ready(resource("r1", spec()));
        ctx.scheduler.resource_unreachable("r1");
        ctx.scheduler.act();

        assert_eq!(ctx.stopped(), vec![ids[0]]);
        assert_eq!(job.get_task(ids[0]).unwrap().state(), TaskState::Failed);
        assert_eq!(job.get_by_state(TaskState::Ready).len(), 1);
        assert_eq!(ctx.released(), vec!["r1"]);
        assert!(ctx.scheduler.resources().is_empty());
    }

    #[test]
    fn lost_resource_fails_its_task() {
        let mut ctx = TestCtx::new(SchedulerConfig::default());
        let (job, ids) = ctx.add_job(&[spec()]);
        ctx.scheduler.resource_ready(resource("r1", spec()));
        ctx.scheduler.resource_lost("r1");
        assert_eq!(ctx.released(), vec!["r1"]);
        assert_eq!(ctx.stopped(), vec![ids[0]]);
        assert_eq!(job.get_task(ids[0]).unwrap().state(), TaskState::Failed);
        assert_eq!(job.get_by_state(TaskState::Ready).len(), 1);
        assert_eq!(ctx.scheduler.running_task_on("r1"), None);

        ctx.scheduler.act();
        assert_eq!(ctx.stopped(), vec![ids[0]]);
    }

    #[test]
    fn lost_resource_granted_again_runs_recovered_task() {
        let mut ctx = TestCtx::new(SchedulerConfig::default());
        let (job, ids) = ctx.add_job(&[spec(), spec()]);
        ctx.scheduler.resource_ready(resource("r1", spec()));
        ctx.scheduler.resource_lost("r1");
        ctx.scheduler.resource_ready(resource("r1", spec()));
        ctx.scheduler.act();
        ctx.scheduler.tick();

        let clone = job.get_by_state(TaskState::Running)[0].id();
        assert_eq!(job.get_task(clone).unwrap().origin(), Some(ids[0]));
        assert_eq!(ctx.scheduler.running_task_on("r1"), Some(clone));
        assert_eq!(job.get_task(ids[0]).unwrap().state(), TaskState::Failed);

        ctx.scheduler.task_completed(clone);
        ctx.scheduler.resource_ready(resource("r2", spec()));
        ctx.scheduler.task_completed(ids[1]);
        assert!(job.get_by_state(TaskState::Running).is_empty());
        assert!(job.is_finished());
    }

    #[test]
    fn bound_resource_is_not_bound_again() {
        let mut ctx = TestCtx::new(SchedulerConfig::default());
        let (job, ids) = ctx.add_job(&[spec(), spec()]);
        ctx.scheduler.resource_ready(resource("r1", spec()));
        assert!(!ctx.scheduler.run_task("r1", ids[1]));
        assert_eq!(ctx.scheduler.running_task_on("r1"), Some(ids[0]));
        assert_eq!(job.get_task(ids[1]).unwrap().state(), TaskState::Ready);
    }

    #[test]
    fn stop_task_keeps_resource() {
        let mut ctx = TestCtx::new(SchedulerConfig::default());
        let (_, ids) = ctx.add_job(&[spec()]);
        ctx.scheduler.resource_ready(resource("r1", spec()));
        assert_eq!(ctx.scheduler.stop_task(ids[0]), Some("r1".to_string()));
        assert_eq!(ctx.scheduler.stop_task(ids[0]), None);
        assert_eq!(ctx.stopped(), vec![ids[0]]);
        assert_eq!(ctx.scheduler.resources()[0].state(), ResourceState::Idle);
        assert!(ctx.released().is_empty());
    }

    #[test]
    fn demand_follows_ready_tasks() {
        let mut ctx = TestCtx::new(SchedulerConfig::default());
        let (job, ids) = ctx.add_job(&[spec(), spec(), other_spec()]);
        ctx.scheduler.tick();

        let mut demand: Vec<(String, usize)> = ctx
            .infra_messages()
            .into_iter()
            .filter_map(|message| match message {
                InfraMessage::EnsureDemand { spec, count, .. } => Some((spec.image, count)),
                _ => None,
            })
            .collect();
        demand.sort();
        assert_eq!(
            demand,
            vec![("debian".to_string(), 1), ("ubuntu".to_string(), 2)]
        );

        job.remove_task(ids[2]).unwrap();
        ctx.scheduler.tick();
        let mut demand: Vec<(String, usize)> = ctx
            .infra_messages()
            .into_iter()
            .filter_map(|message| match message {
                InfraMessage::EnsureDemand { spec, count, .. } => Some((spec.image, count)),
                _ => None,
            })
            .collect();
        demand.sort();
        assert_eq!(
            demand,
            vec![("debian".to_string(), 0), ("ubuntu".to_string(), 2)]
        );
    }

    #[test]
    fn remove_job_stops_and_releases() {
        let mut ctx = TestCtx::new(SchedulerConfig::default());
        let (job, ids) = ctx.add_job(&[spec()]);
        ctx.scheduler.resource_ready(resource("r1", spec()));

        let removed = ctx.scheduler.remove_job(job.id()).unwrap();
        assert_eq!(removed.id(), job.id());
        assert_eq!(ctx.stopped(), vec![ids[0]]);
        assert_eq!(ctx.released(), vec!["r1"]);
        assert!(ctx.scheduler.remove_job(job.id()).is_none());
        assert!(ctx.scheduler.status().jobs.is_empty());
    }

    #[test]
    fn stop_releases_resources_and_withdraws_orders() {
        let mut ctx = TestCtx::new(SchedulerConfig::default());
        let (_, ids) = ctx.add_job(&[spec(), spec()]);
        ctx.scheduler.resource_ready(resource("r1", spec()));
        ctx.scheduler.stop();

        assert_eq!(ctx.stopped(), vec![ids[0]]);
        let messages = ctx.infra_messages();
        assert!(matches!(&messages[0], InfraMessage::ReleaseResource(r) if r.id() == "r1"));
        assert!(matches!(
            messages[1],
            InfraMessage::WithdrawOrders(id) if id == SchedulerId::new(1)
        ));
    }
}
