// src/engine/state.rs

//! Run-level execution state.
//!
//! Fields are private; the scheduler core mutates them only through the
//! transition methods below, which keep the id sets disjoint and the
//! derived numbers consistent.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::dag::{Task, TaskId};
use crate::types::{RunStatus, TaskStatus};

/// Kind of a lifecycle history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Started,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskStatusChanged,
    Blocked,
    Paused,
    Resumed,
    Reopened,
    Stopped,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: HistoryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub message: String,
}

/// Entry of the append-only error log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionError {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub message: String,
    /// Fatal errors prevented a transition; non-fatal ones were recorded
    /// while the run carried on.
    pub fatal: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionState {
    status: RunStatus,
    project_id: Option<String>,
    run_id: u64,
    current_task: Option<TaskId>,
    queued: BTreeSet<TaskId>,
    completed: BTreeSet<TaskId>,
    failed: BTreeSet<TaskId>,
    blocked: BTreeSet<TaskId>,
    total_tasks: usize,
    progress: u8,
    errors: Vec<ExecutionError>,
    history: Vec<HistoryEntry>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl ExecutionState {
    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn current_task(&self) -> Option<&str> {
        self.current_task.as_deref()
    }

    pub fn queued(&self) -> &BTreeSet<TaskId> {
        &self.queued
    }

    pub fn completed(&self) -> &BTreeSet<TaskId> {
        &self.completed
    }

    pub fn failed(&self) -> &BTreeSet<TaskId> {
        &self.failed
    }

    pub fn blocked(&self) -> &BTreeSet<TaskId> {
        &self.blocked
    }

    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.len()
    }

    pub fn total_tasks(&self) -> usize {
        self.total_tasks
    }

    /// `completed / total * 100`, rounded.
    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn errors(&self) -> &[ExecutionError] {
        &self.errors
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    // ---- transitions -------------------------------------------------------

    /// Fresh `running` state for a new run over `tasks`.
    pub(crate) fn begin(project_id: &str, run_id: u64, tasks: &[Task]) -> Self {
        let mut state = Self {
            status: RunStatus::Running,
            project_id: Some(project_id.to_string()),
            run_id,
            total_tasks: tasks.len(),
            started_at: Some(Utc::now()),
            ..Self::default()
        };

        for task in tasks {
            match task.status {
                TaskStatus::Completed => {
                    state.completed.insert(task.id.clone());
                }
                TaskStatus::Failed => {
                    state.failed.insert(task.id.clone());
                }
                TaskStatus::Cancelled | TaskStatus::InProgress => {}
                TaskStatus::Blocked => {
                    state.blocked.insert(task.id.clone());
                }
                TaskStatus::Pending => {
                    state.queued.insert(task.id.clone());
                }
            }
        }
        state.recompute_progress();
        state.log(
            HistoryKind::Started,
            None,
            format!("run {run_id} started for project {project_id} with {} tasks", tasks.len()),
        );
        state
    }

    /// Idle state that only carries a fatal error explaining why a start
    /// was refused.
    pub(crate) fn rejected(project_id: &str, message: impl Into<String>) -> Self {
        let mut state = Self {
            project_id: Some(project_id.to_string()),
            ..Self::default()
        };
        state.record_error(None, message, true);
        state
    }

    pub(crate) fn record_error(
        &mut self,
        task_id: Option<&str>,
        message: impl Into<String>,
        fatal: bool,
    ) {
        self.errors.push(ExecutionError {
            timestamp: Utc::now(),
            task_id: task_id.map(str::to_string),
            message: message.into(),
            fatal,
        });
    }

    pub(crate) fn mark_dispatched(&mut self, task_id: &str) {
        self.current_task = Some(task_id.to_string());
        self.queued.remove(task_id);
        self.blocked.remove(task_id);
        self.log(HistoryKind::TaskStarted, Some(task_id), "task dispatched");
    }

    /// Task started outside the scheduler (status change notification).
    pub(crate) fn mark_running_elsewhere(&mut self, task_id: &str) {
        self.queued.remove(task_id);
        self.blocked.remove(task_id);
    }

    pub(crate) fn mark_completed(&mut self, task_id: &str) {
        self.release_current(task_id);
        self.queued.remove(task_id);
        self.blocked.remove(task_id);
        self.failed.remove(task_id);
        self.completed.insert(task_id.to_string());
        self.recompute_progress();
        self.log(HistoryKind::TaskCompleted, Some(task_id), "task completed");
    }

    pub(crate) fn mark_failed(&mut self, task_id: &str, message: &str) {
        self.release_current(task_id);
        self.queued.remove(task_id);
        self.blocked.remove(task_id);
        self.completed.remove(task_id);
        self.failed.insert(task_id.to_string());
        self.recompute_progress();
        self.record_error(Some(task_id), message, false);
        self.log(
            HistoryKind::TaskFailed,
            Some(task_id),
            format!("task failed: {message}"),
        );
    }

    pub(crate) fn mark_cancelled(&mut self, task_id: &str) {
        self.release_current(task_id);
        self.queued.remove(task_id);
        self.blocked.remove(task_id);
        self.completed.remove(task_id);
        self.failed.remove(task_id);
        self.recompute_progress();
    }

    /// Put a task back in line (retry after failure, or reopened).
    pub(crate) fn mark_requeued(&mut self, task_id: &str) {
        self.release_current(task_id);
        self.completed.remove(task_id);
        self.failed.remove(task_id);
        self.blocked.remove(task_id);
        self.queued.insert(task_id.to_string());
        self.recompute_progress();
    }

    pub(crate) fn mark_blocked(&mut self, task_id: &str) {
        self.release_current(task_id);
        self.queued.remove(task_id);
        self.completed.remove(task_id);
        self.failed.remove(task_id);
        self.blocked.insert(task_id.to_string());
        self.recompute_progress();
    }

    /// Replace the blocked set. Ids leaving it go back to the queue.
    /// Returns `true` if the set changed.
    pub(crate) fn set_blocked(&mut self, ids: BTreeSet<TaskId>) -> bool {
        if ids == self.blocked {
            return false;
        }
        let released: Vec<TaskId> = self.blocked.difference(&ids).cloned().collect();
        for id in released {
            self.queued.insert(id);
        }
        for id in &ids {
            self.queued.remove(id);
        }
        self.blocked = ids;
        let summary = self.blocked.iter().cloned().collect::<Vec<_>>().join(", ");
        self.log(
            HistoryKind::Blocked,
            None,
            format!("no runnable task; blocked: [{summary}]"),
        );
        true
    }

    pub(crate) fn note_status_change(&mut self, task_id: &str, from: TaskStatus, to: TaskStatus) {
        self.log(
            HistoryKind::TaskStatusChanged,
            Some(task_id),
            format!("status changed externally: {from} -> {to}"),
        );
    }

    pub(crate) fn pause(&mut self) {
        self.status = RunStatus::Paused;
        self.log(HistoryKind::Paused, None, "run paused");
    }

    pub(crate) fn resume(&mut self) {
        self.status = RunStatus::Running;
        self.log(HistoryKind::Resumed, None, "run resumed");
    }

    /// A completed run got new work (a task was reopened).
    pub(crate) fn reopen(&mut self) {
        self.status = RunStatus::Running;
        self.finished_at = None;
        self.log(HistoryKind::Reopened, None, "run reopened");
    }

    /// Back to `idle`; counts and logs are kept.
    pub(crate) fn stop(&mut self) {
        self.status = RunStatus::Idle;
        self.current_task = None;
        self.queued.clear();
        self.log(HistoryKind::Stopped, None, "run stopped");
    }

    pub(crate) fn finish(&mut self) {
        self.status = RunStatus::Completed;
        self.current_task = None;
        self.finished_at = Some(Utc::now());
        self.log(
            HistoryKind::Completed,
            None,
            format!(
                "run completed: {} completed, {} failed of {}",
                self.completed.len(),
                self.failed.len(),
                self.total_tasks
            ),
        );
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn release_current(&mut self, task_id: &str) {
        if self.current_task.as_deref() == Some(task_id) {
            self.current_task = None;
        }
    }

    fn recompute_progress(&mut self) {
        self.progress = if self.total_tasks == 0 {
            0
        } else {
            let pct = self.completed.len() as f64 / self.total_tasks as f64 * 100.0;
            pct.round().clamp(0.0, 100.0) as u8
        };
    }

    fn log(&mut self, kind: HistoryKind, task_id: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        debug!(?kind, task = ?task_id, %message, "execution history");
        self.history.push(HistoryEntry {
            timestamp: Utc::now(),
            kind,
            task_id: task_id.map(str::to_string),
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tasks(n: usize) -> Vec<Task> {
        (0..n).map(|i| Task::new(format!("t{i}"), format!("T{i}"))).collect()
    }

    fn assert_disjoint(state: &ExecutionState) {
        let sets = [&state.queued, &state.completed, &state.failed, &state.blocked];
        for (i, a) in sets.iter().enumerate() {
            for b in sets.iter().skip(i + 1) {
                assert!(a.is_disjoint(b), "sets overlap: {a:?} / {b:?}");
            }
        }
    }

    #[test]
    fn progress_is_rounded_percentage_of_completed() {
        let mut state = ExecutionState::begin("p", 1, &tasks(3));
        assert_eq!(state.progress(), 0);

        state.mark_dispatched("t0");
        state.mark_completed("t0");
        assert_eq!(state.progress(), 33);

        state.mark_dispatched("t1");
        state.mark_completed("t1");
        assert_eq!(state.progress(), 67);
        assert_disjoint(&state);
    }

    #[test]
    fn failure_is_logged_as_non_fatal_error() {
        let mut state = ExecutionState::begin("p", 1, &tasks(2));
        state.mark_dispatched("t1");
        state.mark_failed("t1", "compiler exploded");

        assert_eq!(state.current_task(), None);
        assert_eq!(state.failed_count(), 1);
        assert_eq!(state.errors().len(), 1);
        assert!(!state.errors()[0].fatal);
        assert_eq!(state.errors()[0].task_id.as_deref(), Some("t1"));
        assert_disjoint(&state);
    }

    #[test]
    fn set_blocked_moves_ids_between_queue_and_blocked() {
        let mut state = ExecutionState::begin("p", 1, &tasks(3));
        let blocked: BTreeSet<TaskId> = ["t1".to_string(), "t2".to_string()].into();
        assert!(state.set_blocked(blocked.clone()));
        assert!(!state.set_blocked(blocked));
        assert_eq!(state.queued_count(), 1);

        assert!(state.set_blocked(["t2".to_string()].into()));
        assert!(state.queued().contains("t1"));
        assert_disjoint(&state);
    }

    #[test]
    fn stop_keeps_counts_and_reset_clears_everything() {
        let mut state = ExecutionState::begin("p", 4, &tasks(2));
        state.mark_dispatched("t0");
        state.mark_completed("t0");
        state.mark_dispatched("t1");

        state.stop();
        assert_eq!(state.status(), RunStatus::Idle);
        assert_eq!(state.current_task(), None);
        assert_eq!(state.queued_count(), 0);
        assert_eq!(state.completed_count(), 1);
        assert_eq!(state.history().last().map(|h| h.kind), Some(HistoryKind::Stopped));

        state.reset();
        assert_eq!(state, ExecutionState::default());
    }

    #[test]
    fn begin_seeds_sets_from_existing_statuses() {
        let input = vec![
            Task::new("done", "D").with_status(TaskStatus::Completed),
            Task::new("bad", "B").with_status(TaskStatus::Failed),
            Task::new("todo", "T"),
            Task::new("gone", "G").with_status(TaskStatus::Cancelled),
        ];
        let state = ExecutionState::begin("p", 1, &input);

        assert_eq!(state.completed_count(), 1);
        assert_eq!(state.failed_count(), 1);
        assert_eq!(state.queued_count(), 1);
        assert_eq!(state.progress(), 25);
        assert_eq!(state.history()[0].kind, HistoryKind::Started);
    }
}
