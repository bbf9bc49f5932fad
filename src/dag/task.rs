// src/dag/task.rs

//! Task records and the dispatch description handed to executors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Complexity, Priority, TaskStatus};

/// Canonical task identity type used throughout the crate.
pub type TaskId = String;

/// A unit of work inside a project run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub complexity: Complexity,
    /// Percent complete, 0..=100.
    #[serde(default)]
    pub progress: u8,
    /// Identities of tasks that must complete first. References to tasks
    /// outside the set are ignored by the resolver.
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: TaskStatus::Pending,
            priority: Priority::default(),
            complexity: Complexity::default(),
            progress: 0,
            dependencies: Vec::new(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn depends_on(mut self, dep: impl Into<TaskId>) -> Self {
        self.dependencies.push(dep.into());
        self
    }
}

/// Description of a task that the scheduler wants the executor to run now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub title: String,
    pub priority: Priority,
    pub complexity: Complexity,
    /// Monotonically increasing run identifier. Results carrying a stale
    /// `run_id` are discarded by the scheduler.
    pub run_id: u64,
    /// Dispatch count of this task within the run, starting at 1. A task
    /// requeued while in flight is dispatched again with a higher attempt,
    /// and the older attempt's result is discarded.
    pub attempt: u32,
}

impl ScheduledTask {
    pub fn from_task(task: &Task, run_id: u64, attempt: u32) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            priority: task.priority,
            complexity: task.complexity,
            run_id,
            attempt,
        }
    }
}
