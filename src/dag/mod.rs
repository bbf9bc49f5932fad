// src/dag/mod.rs

//! Task graph representation and dependency resolution.
//!
//! - [`task`] holds the task record and the executor-facing dispatch type.
//! - [`graph`] is an adjacency view of a task set plus cycle diagnostics.
//! - [`resolver`] computes execution order and the next runnable task.

pub mod graph;
pub mod resolver;
pub mod task;

pub use graph::DagGraph;
pub use resolver::{blocking_tasks, compute_order, next_executable_task};
pub use task::{ScheduledTask, Task, TaskId};
