use tokio::process::Command;
use tokio::sync::oneshot;

use crate::job::Task;
use crate::resource::Resource;
use crate::scheduler::service::SchedulerHandle;
use crate::{Map, TaskId, WrappedRcRefCell};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskExecutionState {
    NotCreated,
    Running,
    Completed,
    Failed,
}

/// Executes tasks on resources and reports their outcome back to the scheduler.
///
/// Execution is fire-and-forget, outcomes arrive asynchronously as scheduler messages.
pub trait TaskMonitor {
    fn run_task(&mut self, task: &Task, resource: &Resource);

    /// Aborts the execution of a task. No outcome is reported for a stopped task.
    fn stop_task(&mut self, task_id: TaskId);

    fn stop_tasks(&mut self, task_ids: &[TaskId]) {
        for task_id in task_ids {
            self.stop_task(*task_id);
        }
    }

    fn get_task_state(&self, task_id: TaskId) -> TaskExecutionState;
}

#[derive(Default)]
struct MonitorState {
    running: Map<TaskId, oneshot::Sender<()>>,
    finished: Map<TaskId, TaskExecutionState>,
}

/// Runs the commands of a task as shell commands on this machine.
///
/// Commands are executed one after another with `sh -c`. The first command that cannot be
/// spawned or that exits unsuccessfully fails the task.
pub struct LocalTaskMonitor {
    scheduler: SchedulerHandle,
    state: WrappedRcRefCell<MonitorState>,
}

impl LocalTaskMonitor {
    pub fn new(scheduler: SchedulerHandle) -> Self {
        Self {
            scheduler,
            state: Default::default(),
        }
    }
}

fn command_for_task(command: &str, task_id: TaskId, resource: &Resource) -> Command {
    let mut cmd = Command::new("sh");
    cmd.kill_on_drop(true);
    cmd.arg("-c").arg(command);
    cmd.env("NIMBUS_TASK_ID", task_id.to_string());
    cmd.env("NIMBUS_RESOURCE_ID", resource.id());
    if let Some(host) = resource.host() {
        cmd.env("NIMBUS_HOST", host);
    }
    if let Some(port) = resource.port() {
        cmd.env("NIMBUS_PORT", port.to_string());
    }
    cmd
}

async fn execute_commands(
    task_id: TaskId,
    commands: Vec<String>,
    resource: Resource,
) -> Result<(), String> {
    for command in &commands {
        log::debug!("Task {task_id} on {resource}: running `{command}`");
        let status = command_for_task(command, task_id, &resource)
            .status()
            .await
            .map_err(|error| format!("Cannot start `{command}`: {error}"))?;
        if !status.success() {
            let code = status.code().unwrap_or(-1);
            return Err(format!("Command `{command}` terminated with exit code {code}"));
        }
    }
    Ok(())
}

impl TaskMonitor for LocalTaskMonitor {
    fn run_task(&mut self, task: &Task, resource: &Resource) {
        let task_id = task.id();
        let (stop_sender, stop_receiver) = oneshot::channel();
        {
            let mut state = self.state.get_mut();
            state.finished.remove(&task_id);
            if state.running.insert(task_id, stop_sender).is_some() {
                log::warn!("Task {task_id} was already running, previous execution aborted");
            }
        }

        let execution = execute_commands(task_id, task.commands().to_vec(), resource.clone());
        let state = self.state.clone();
        let scheduler = self.scheduler.clone();
        tokio::task::spawn_local(async move {
            tokio::select! {
                biased;
                _ = stop_receiver => {
                    log::debug!("Execution of task {task_id} stopped");
                }
                result = execution => {
                    let mut state = state.get_mut();
                    state.running.remove(&task_id);
                    match result {
                        Ok(()) => {
                            log::debug!("Task {task_id} finished");
                            state.finished.insert(task_id, TaskExecutionState::Completed);
                            scheduler.task_completed(task_id);
                        }
                        Err(reason) => {
                            log::debug!("Task {task_id} failed: {reason}");
                            state.finished.insert(task_id, TaskExecutionState::Failed);
                            scheduler.task_failed(task_id, reason);
                        }
                    }
                }
            }
        });
    }

    fn stop_task(&mut self, task_id: TaskId) {
        if let Some(sender) = self.state.get_mut().running.remove(&task_id) {
            // The execution may have just finished on its own
            let _ = sender.send(());
        }
    }

    fn get_task_state(&self, task_id: TaskId) -> TaskExecutionState {
        let state = self.state.get();
        if state.running.contains_key(&task_id) {
            return TaskExecutionState::Running;
        }
        state
            .finished
            .get(&task_id)
            .copied()
            .unwrap_or(TaskExecutionState::NotCreated)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::future::Future;
    use std::time::Duration;

    use super::{LocalTaskMonitor, TaskExecutionState, TaskMonitor};
    use crate::common::rpc::{make_rpc_queue, RpcReceiver};
    use crate::job::{Job, Task};
    use crate::resource::{Resource, METADATA_HOST};
    use crate::scheduler::service::{SchedulerHandle, SchedulerMessage};
    use crate::specification::Specification;
    use crate::{JobId, SchedulerId};

    fn create_monitor() -> (LocalTaskMonitor, RpcReceiver<SchedulerMessage>) {
        let (tx, rx) = make_rpc_queue();
        (
            LocalTaskMonitor::new(SchedulerHandle::new(SchedulerId::new(0), tx)),
            rx,
        )
    }

    fn task(commands: &[&str]) -> Task {
        let job = Job::new(JobId::new(1), "job");
        let id = job.add_task(
            Specification::new("image", "key"),
            commands.iter().map(|c| c.to_string()).collect(),
        );
        job.run(id).unwrap()
    }

    fn resource() -> Resource {
        Resource::new("vm-1", "req-1", Specification::new("image", "key"))
            .with_metadata(METADATA_HOST, "127.0.0.1")
    }

    async fn run_local<F: Future>(f: F) -> F::Output {
        tokio::task::LocalSet::new().run_until(f).await
    }

    #[tokio::test]
    async fn successful_commands_complete_task() {
        run_local(async {
            let (mut monitor, mut rx) = create_monitor();
            let task = task(&["true", "test \"$NIMBUS_TASK_ID\" = 1@0 && test \"$NIMBUS_HOST\" = 127.0.0.1"]);
            monitor.run_task(&task, &resource());
            assert_eq!(monitor.get_task_state(task.id()), TaskExecutionState::Running);

            match rx.recv().await.unwrap() {
                SchedulerMessage::TaskCompleted(id) => assert_eq!(id, task.id()),
                msg => panic!("Unexpected message {msg:?}"),
            }
            assert_eq!(monitor.get_task_state(task.id()), TaskExecutionState::Completed);
        })
        .await;
    }

    #[tokio::test]
    async fn failing_command_fails_task() {
        run_local(async {
            let (mut monitor, mut rx) = create_monitor();
            let task = task(&["exit 3", "true"]);
            monitor.run_task(&task, &resource());

            match rx.recv().await.unwrap() {
                SchedulerMessage::TaskFailed(id, reason) => {
                    assert_eq!(id, task.id());
                    assert!(reason.contains("exit code 3"));
                }
                msg => panic!("Unexpected message {msg:?}"),
            }
            assert_eq!(monitor.get_task_state(task.id()), TaskExecutionState::Failed);
        })
        .await;
    }

    #[tokio::test]
    async fn stopped_task_is_not_reported() {
        run_local(async {
            let (mut monitor, mut rx) = create_monitor();
            let task = task(&["sleep 10"]);
            monitor.run_task(&task, &resource());
            tokio::task::yield_now().await;
            monitor.stop_tasks(&[task.id()]);

            assert_eq!(monitor.get_task_state(task.id()), TaskExecutionState::NotCreated);
            assert!(tokio::time::timeout(Duration::from_millis(200), rx.recv())
                .await
                .is_err());
        })
        .await;
    }
}
