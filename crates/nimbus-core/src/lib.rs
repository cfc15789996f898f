//! Engine that turns resource specifications into live resources on an elastic
//! infrastructure and schedules tasks onto them.
//!
//! The [`infra`] manager owns every order and resource and runs as a single actor.
//! The [`scheduler`] binds ready tasks of its jobs to resources granted by the manager
//! and recovers failed tasks through the [`job`] retry machine.

pub mod common;
pub mod ids;
pub mod infra;
pub mod job;
pub mod requirements;
pub mod resource;
pub mod scheduler;
pub mod specification;

pub use crate::common::{Map, Set, WrappedRcRefCell};
pub use crate::ids::{JobId, JobTaskId, OrderId, RequestId, ResourceId, SchedulerId, TaskId};

pub type Error = crate::common::error::NimbusError;
pub type Result<T> = std::result::Result<T, Error>;
