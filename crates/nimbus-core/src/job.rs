use std::collections::{BTreeMap, VecDeque};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::specification::Specification;
use crate::{JobId, JobTaskId, TaskId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Ready,
    Running,
    Completed,
    Failed,
}

impl Display for TaskState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TaskState::Ready => "ready",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    spec: Specification,
    commands: Vec<String>,
    /// How many times the task (or the task it was cloned from) was dispatched.
    retries: u32,
    /// The failed task this task was cloned from.
    origin: Option<TaskId>,
    state: TaskState,
    metadata: BTreeMap<String, String>,
}

impl Task {
    fn new(id: TaskId, spec: Specification, commands: Vec<String>) -> Self {
        Self {
            id,
            spec,
            commands,
            retries: 0,
            origin: None,
            state: TaskState::Ready,
            metadata: Default::default(),
        }
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub fn spec(&self) -> &Specification {
        &self.spec
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn origin(&self) -> Option<TaskId> {
        self.origin
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, TaskState::Completed | TaskState::Failed)
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Copy of this task with a new identity, ready to be scheduled again.
    fn clone_for_retry(&self, id: TaskId) -> Task {
        Task {
            id,
            spec: self.spec.clone(),
            commands: self.commands.clone(),
            retries: self.retries,
            origin: Some(self.id),
            state: TaskState::Ready,
            metadata: self.metadata.clone(),
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn position_of<'a>(tasks: impl IntoIterator<Item = &'a Task>, id: TaskId) -> Option<usize> {
    tasks.into_iter().position(|t| t.id == id)
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct JobCounters {
    pub ready: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

/// A named collection of tasks split into buckets by their state.
///
/// Buckets are guarded by reader/writer locks, so readers never block each other. Mutations
/// that move a task between buckets lock both buckets, always in the order
/// ready, running, completed, failed.
pub struct Job {
    id: JobId,
    name: String,
    task_id_counter: AtomicU32,
    ready: RwLock<VecDeque<Task>>,
    running: RwLock<Vec<Task>>,
    completed: RwLock<Vec<Task>>,
    failed: RwLock<Vec<Task>>,
}

impl Job {
    pub fn new(id: JobId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            task_id_counter: AtomicU32::new(0),
            ready: Default::default(),
            running: Default::default(),
            completed: Default::default(),
            failed: Default::default(),
        }
    }

    #[inline]
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn next_task_id(&self) -> TaskId {
        let id = self.task_id_counter.fetch_add(1, Ordering::Relaxed);
        TaskId::new(self.id, JobTaskId::new(id))
    }

    pub fn add_task(&self, spec: Specification, commands: Vec<String>) -> TaskId {
        let id = self.next_task_id();
        write(&self.ready).push_back(Task::new(id, spec, commands));
        id
    }

    /// Snapshot of the tasks in the given state. Ready tasks are returned in scheduling order.
    pub fn get_by_state(&self, state: TaskState) -> Vec<Task> {
        match state {
            TaskState::Ready => read(&self.ready).iter().cloned().collect(),
            TaskState::Running => read(&self.running).clone(),
            TaskState::Completed => read(&self.completed).clone(),
            TaskState::Failed => read(&self.failed).clone(),
        }
    }

    pub fn get_task(&self, id: TaskId) -> Option<Task> {
        fn find<'a>(tasks: impl IntoIterator<Item = &'a Task>, id: TaskId) -> Option<Task> {
            tasks.into_iter().find(|t| t.id == id).cloned()
        }
        find(read(&self.ready).iter(), id)
            .or_else(|| find(read(&self.running).iter(), id))
            .or_else(|| find(read(&self.completed).iter(), id))
            .or_else(|| find(read(&self.failed).iter(), id))
    }

    /// Moves a ready task to running and counts the dispatch attempt.
    pub fn run(&self, id: TaskId) -> Option<Task> {
        let mut ready = write(&self.ready);
        let mut running = write(&self.running);
        let index = position_of(ready.iter(), id)?;
        let mut task = ready.remove(index)?;
        task.state = TaskState::Running;
        task.retries += 1;
        running.push(task.clone());
        Some(task)
    }

    pub fn finish(&self, id: TaskId) -> bool {
        let mut running = write(&self.running);
        let mut completed = write(&self.completed);
        match position_of(running.iter(), id) {
            Some(index) => {
                let mut task = running.remove(index);
                task.state = TaskState::Completed;
                completed.push(task);
                true
            }
            None => false,
        }
    }

    pub fn fail(&self, id: TaskId) -> bool {
        let mut running = write(&self.running);
        let mut failed = write(&self.failed);
        match position_of(running.iter(), id) {
            Some(index) => {
                let mut task = running.remove(index);
                task.state = TaskState::Failed;
                failed.push(task);
                true
            }
            None => false,
        }
    }

    /// Clones a failed task and puts the clone in front of all ready tasks.
    ///
    /// The failed task itself stays failed. Returns the id of the clone.
    pub fn recover_task(&self, id: TaskId) -> Option<TaskId> {
        let mut ready = write(&self.ready);
        let failed = read(&self.failed);
        let original = failed.iter().find(|t| t.id == id)?;
        let clone = original.clone_for_retry(self.next_task_id());
        let clone_id = clone.id;
        ready.push_front(clone);
        Some(clone_id)
    }

    /// Withdraws a task that is ready or running. Finished tasks are kept.
    pub fn remove_task(&self, id: TaskId) -> Option<Task> {
        let mut ready = write(&self.ready);
        let mut running = write(&self.running);
        if let Some(index) = position_of(ready.iter(), id) {
            return ready.remove(index);
        }
        position_of(running.iter(), id).map(|index| running.remove(index))
    }

    /// Consistent snapshot of bucket sizes.
    pub fn counters(&self) -> JobCounters {
        let ready = read(&self.ready);
        let running = read(&self.running);
        let completed = read(&self.completed);
        let failed = read(&self.failed);
        JobCounters {
            ready: ready.len(),
            running: running.len(),
            completed: completed.len(),
            failed: failed.len(),
        }
    }

    /// There is nothing left to run.
    pub fn is_finished(&self) -> bool {
        let ready = read(&self.ready);
        let running = read(&self.running);
        ready.is_empty() && running.is_empty()
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("counters", &self.counters())
            .finish()
    }
}
