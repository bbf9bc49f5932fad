// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated execution state
//! - a list of commands describing what the IO shell should do next
//!   (dispatch a task, emit an event, exit)
//!
//! The async shell (`engine::runtime::Runtime`) is responsible for reading
//! events from channels, handing `ScheduledTask`s to the executor and
//! publishing events on the bus.
//!
//! The core is unit tested without tokio, channels or processes.

use std::collections::HashMap;

use serde::Serialize;

use crate::dag::{Task, TaskId, blocking_tasks, compute_order, next_executable_task};
use crate::engine::event_handlers::{
    CoreStep, handle_pause, handle_reset, handle_resume, handle_set_status, handle_start,
    handle_stop, handle_task_finished,
};
use crate::engine::state::ExecutionState;
use crate::engine::{Command, RuntimeEvent, RuntimeOptions};
use crate::errors::Result;

/// Pure core runtime state.
///
/// This owns the task set of the current (or last) run, its execution state
/// and the precomputed execution order. It has no channels, no tokio types
/// and does not perform any IO.
#[derive(Debug, Default)]
pub struct CoreRuntime {
    pub(super) tasks: Vec<Task>,
    /// Positions into `tasks`, in execution order. Empty until a start
    /// succeeds.
    pub(super) order: Vec<usize>,
    pub(super) state: ExecutionState,
    pub(super) run_counter: u64,
    /// Latest dispatch attempt per task in the current run.
    pub(super) attempts: HashMap<TaskId, u32>,
    pub(super) options: RuntimeOptions,
}

impl CoreRuntime {
    pub fn new(options: RuntimeOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task_by_id(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn execution_order(&self) -> Vec<&Task> {
        self.order.iter().map(|&i| &self.tasks[i]).collect()
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::Command(command) => match command {
                Command::Start { project_id, tasks } => handle_start(self, project_id, tasks),
                Command::Pause => handle_pause(self),
                Command::Resume => handle_resume(self),
                Command::Stop => handle_stop(self),
                Command::Reset => handle_reset(self),
                Command::SetTaskStatus { task, status } => handle_set_status(self, &task, status),
            },
            RuntimeEvent::TaskFinished {
                task,
                run_id,
                attempt,
                outcome,
            } => handle_task_finished(self, &task, run_id, attempt, outcome),
            RuntimeEvent::ShutdownRequested => CoreStep {
                commands: Vec::new(),
                keep_running: false,
                error: None,
            },
        }
    }

    /// Owned copy of everything a reader needs, published by the shell
    /// after each step.
    pub fn snapshot(&self) -> ExecutionSnapshot {
        ExecutionSnapshot {
            state: self.state.clone(),
            tasks: self.tasks.clone(),
            order: self
                .order
                .iter()
                .map(|&i| self.tasks[i].id.clone())
                .collect(),
        }
    }
}

/// Point-in-time view of the scheduler, published through a `watch` channel.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionSnapshot {
    pub state: ExecutionState,
    pub tasks: Vec<Task>,
    /// Task ids in execution order for the current run.
    pub order: Vec<String>,
}

impl ExecutionSnapshot {
    pub fn task_by_id(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn next_executable_task(&self) -> Result<Option<&Task>> {
        next_executable_task(&self.tasks)
    }

    pub fn blocking_tasks(&self, id: &str) -> Vec<&Task> {
        blocking_tasks(&self.tasks, id)
    }

    /// Recomputed from the task set, so a cyclic set reports its error.
    pub fn execution_order(&self) -> Result<Vec<&Task>> {
        compute_order(&self.tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CoreCommand, TaskOutcome};
    use crate::errors::OrchestratorError;
    use crate::events::EventKind;
    use crate::types::{Priority, RunStatus, TaskStatus};

    fn core() -> CoreRuntime {
        CoreRuntime::new(RuntimeOptions::default())
    }

    fn start(core: &mut CoreRuntime, tasks: Vec<Task>) -> CoreStep {
        core.step(
            Command::Start {
                project_id: "proj".into(),
                tasks,
            }
            .into(),
        )
    }

    fn dispatched(step: &CoreStep) -> Vec<String> {
        step.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::Dispatch(t) => Some(t.id.clone()),
                _ => None,
            })
            .collect()
    }

    fn emitted(step: &CoreStep) -> Vec<EventKind> {
        step.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::Emit { kind, .. } => Some(kind.clone()),
                _ => None,
            })
            .collect()
    }

    fn finish(core: &mut CoreRuntime, task: &str, outcome: TaskOutcome) -> CoreStep {
        let attempt = core.attempts.get(task).copied().unwrap_or(1);
        finish_attempt(core, task, attempt, outcome)
    }

    fn finish_attempt(
        core: &mut CoreRuntime,
        task: &str,
        attempt: u32,
        outcome: TaskOutcome,
    ) -> CoreStep {
        let run_id = core.state().run_id();
        core.step(RuntimeEvent::TaskFinished {
            task: task.into(),
            run_id,
            attempt,
            outcome,
        })
    }

    fn dispatched_attempts(step: &CoreStep) -> Vec<(String, u32)> {
        step.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::Dispatch(t) => Some((t.id.clone(), t.attempt)),
                _ => None,
            })
            .collect()
    }

    fn abc() -> Vec<Task> {
        vec![
            Task::new("A", "a").with_priority(Priority::High),
            Task::new("B", "b")
                .with_priority(Priority::Critical)
                .depends_on("A"),
            Task::new("C", "c").with_priority(Priority::Low),
        ]
    }

    #[test]
    fn start_dispatches_first_task_in_order() {
        let mut core = core();
        let step = start(&mut core, abc());

        assert!(step.error.is_none());
        assert_eq!(dispatched(&step), vec!["A"]);
        assert_eq!(
            emitted(&step),
            vec![EventKind::ExecutionStarted, EventKind::TaskStarted]
        );
        assert_eq!(core.state().status(), RunStatus::Running);
        assert_eq!(core.state().current_task(), Some("A"));
        assert_eq!(
            core.task_by_id("A").map(|t| t.status),
            Some(TaskStatus::InProgress)
        );
        let order: Vec<_> = core.execution_order().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(order, vec!["A", "B", "C"]);
    }

    #[test]
    fn run_walks_the_order_one_task_at_a_time() {
        let mut core = core();
        start(&mut core, abc());

        let step = finish(&mut core, "A", TaskOutcome::Success);
        assert_eq!(dispatched(&step), vec!["B"]);
        let step = finish(&mut core, "B", TaskOutcome::Success);
        assert_eq!(dispatched(&step), vec!["C"]);
        let step = finish(&mut core, "C", TaskOutcome::Success);

        assert!(dispatched(&step).is_empty());
        assert!(emitted(&step).contains(&EventKind::ExecutionCompleted));
        assert_eq!(core.state().status(), RunStatus::Completed);
        assert_eq!(core.state().progress(), 100);
        assert!(step.keep_running);
    }

    #[test]
    fn cyclic_start_stays_idle_with_one_fatal_error() {
        let mut core = core();
        let step = start(
            &mut core,
            vec![
                Task::new("x", "x").depends_on("y"),
                Task::new("y", "y").depends_on("x"),
            ],
        );

        assert!(matches!(
            step.error,
            Some(OrchestratorError::CyclicDependency { .. })
        ));
        assert!(dispatched(&step).is_empty());
        assert_eq!(emitted(&step), vec![EventKind::ExecutionError]);
        assert_eq!(core.state().status(), RunStatus::Idle);
        assert_eq!(core.state().errors().len(), 1);
        assert!(core.state().errors()[0].fatal);
    }

    #[test]
    fn duplicate_task_ids_are_rejected_at_start() {
        let mut core = core();
        let step = start(
            &mut core,
            vec![Task::new("a", "first"), Task::new("a", "second")],
        );

        assert!(matches!(
            step.error,
            Some(OrchestratorError::DuplicateTask(ref id)) if id == "a"
        ));
        assert!(dispatched(&step).is_empty());
        assert_eq!(emitted(&step), vec![EventKind::ExecutionError]);
        assert_eq!(core.state().status(), RunStatus::Idle);
        assert_eq!(core.state().errors().len(), 1);
        assert!(core.state().errors()[0].fatal);

        // Nothing was dispatched, so a result for the id goes nowhere.
        let step = finish(&mut core, "a", TaskOutcome::Success);
        assert!(step.commands.is_empty());
        assert_eq!(core.state().completed_count(), 0);
    }

    #[test]
    fn requeued_in_flight_task_drops_the_superseded_result() {
        let mut core = core();
        let step = start(&mut core, vec![Task::new("a", "a"), Task::new("b", "b")]);
        assert_eq!(dispatched_attempts(&step), vec![("a".to_string(), 1)]);

        let step = core.step(
            Command::SetTaskStatus {
                task: "a".into(),
                status: TaskStatus::Pending,
            }
            .into(),
        );
        assert_eq!(dispatched_attempts(&step), vec![("a".to_string(), 2)]);

        let step = finish_attempt(&mut core, "a", 1, TaskOutcome::failed("first attempt"));
        assert!(step.commands.is_empty());
        assert_eq!(core.state().failed_count(), 0);
        assert_eq!(
            core.task_by_id("a").map(|t| t.status),
            Some(TaskStatus::InProgress)
        );

        let step = finish_attempt(&mut core, "a", 2, TaskOutcome::Success);
        assert!(emitted(&step).contains(&EventKind::TaskCompleted));
        assert_eq!(dispatched_attempts(&step), vec![("b".to_string(), 1)]);
        assert_eq!(core.state().completed_count(), 1);
        assert!(core.state().errors().is_empty());
    }

    #[test]
    fn attempts_restart_with_each_run() {
        let mut core = core();
        start(&mut core, vec![Task::new("a", "a")]);
        core.step(
            Command::SetTaskStatus {
                task: "a".into(),
                status: TaskStatus::Pending,
            }
            .into(),
        );
        finish_attempt(&mut core, "a", 2, TaskOutcome::Success);
        assert_eq!(core.state().status(), RunStatus::Completed);

        let step = start(&mut core, vec![Task::new("a", "a")]);
        assert_eq!(dispatched_attempts(&step), vec![("a".to_string(), 1)]);
    }

    #[test]
    fn pause_stops_dispatch_but_folds_in_flight_result() {
        let mut core = core();
        start(&mut core, abc());

        let step = core.step(Command::Pause.into());
        assert_eq!(emitted(&step), vec![EventKind::ExecutionPaused]);

        let step = finish(&mut core, "A", TaskOutcome::Success);
        assert!(dispatched(&step).is_empty());
        assert_eq!(core.state().completed_count(), 1);
        assert_eq!(core.state().status(), RunStatus::Paused);

        let step = core.step(Command::Resume.into());
        assert_eq!(dispatched(&step), vec!["B"]);
    }

    #[test]
    fn failure_is_recorded_and_the_run_continues() {
        let mut core = core();
        start(
            &mut core,
            vec![Task::new("a", "a"), Task::new("b", "b")],
        );

        let step = finish(&mut core, "a", TaskOutcome::failed("boom"));
        assert!(emitted(&step).contains(&EventKind::TaskFailed));
        assert_eq!(dispatched(&step), vec!["b"]);

        let step = finish(&mut core, "b", TaskOutcome::Success);
        assert!(emitted(&step).contains(&EventKind::ExecutionCompleted));
        assert_eq!(core.state().failed_count(), 1);
        assert_eq!(core.state().errors().len(), 1);
        assert!(!core.state().errors()[0].fatal);
        assert_eq!(core.state().progress(), 50);
    }

    #[test]
    fn failed_dependency_blocks_dependents_until_retried() {
        let mut core = core();
        start(
            &mut core,
            vec![Task::new("a", "a"), Task::new("b", "b").depends_on("a")],
        );

        let step = finish(&mut core, "a", TaskOutcome::failed("nope"));
        assert!(emitted(&step).contains(&EventKind::ExecutionBlocked));
        assert_eq!(core.state().status(), RunStatus::Running);
        assert!(core.state().blocked().contains("b"));
        assert_eq!(
            core.task_by_id("b").map(|t| t.status),
            Some(TaskStatus::Blocked)
        );

        let step = core.step(
            Command::SetTaskStatus {
                task: "a".into(),
                status: TaskStatus::Pending,
            }
            .into(),
        );
        assert_eq!(dispatched(&step), vec!["a"]);

        let step = finish(&mut core, "a", TaskOutcome::Success);
        assert_eq!(dispatched(&step), vec!["b"]);
        assert!(core.state().blocked().is_empty());
    }

    #[test]
    fn stale_run_results_are_ignored() {
        let mut core = core();
        start(&mut core, vec![Task::new("a", "a")]);
        let old_run = core.state().run_id();

        core.step(Command::Reset.into());
        start(&mut core, vec![Task::new("a", "a")]);

        let step = core.step(RuntimeEvent::TaskFinished {
            task: "a".into(),
            run_id: old_run,
            attempt: 1,
            outcome: TaskOutcome::Success,
        });
        assert!(step.commands.is_empty());
        assert_eq!(core.state().completed_count(), 0);
        assert_eq!(core.state().current_task(), Some("a"));
    }

    #[test]
    fn result_after_stop_is_still_applied() {
        let mut core = core();
        start(&mut core, vec![Task::new("a", "a"), Task::new("b", "b")]);

        let step = core.step(Command::Stop.into());
        assert_eq!(emitted(&step), vec![EventKind::ExecutionStopped]);
        assert_eq!(core.state().status(), RunStatus::Idle);

        let step = finish(&mut core, "a", TaskOutcome::Success);
        assert!(dispatched(&step).is_empty());
        assert_eq!(core.state().completed_count(), 1);
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let mut core = core();
        let step = core.step(Command::Pause.into());
        assert!(matches!(
            step.error,
            Some(OrchestratorError::InvalidTransition {
                from: RunStatus::Idle,
                ..
            })
        ));

        start(&mut core, vec![Task::new("a", "a")]);
        let step = start(&mut core, vec![Task::new("b", "b")]);
        assert!(matches!(
            step.error,
            Some(OrchestratorError::InvalidTransition {
                from: RunStatus::Running,
                ..
            })
        ));
        assert!(step.commands.is_empty());
    }

    #[test]
    fn unknown_task_status_change_reports_not_found() {
        let mut core = core();
        start(&mut core, vec![Task::new("a", "a")]);
        let step = core.step(
            Command::SetTaskStatus {
                task: "ghost".into(),
                status: TaskStatus::Completed,
            }
            .into(),
        );
        assert!(matches!(step.error, Some(OrchestratorError::TaskNotFound(_))));
    }

    #[test]
    fn exit_when_finished_requests_exit() {
        let mut core = CoreRuntime::new(RuntimeOptions {
            exit_when_finished: true,
        });
        start(&mut core, vec![Task::new("a", "a")]);
        let step = finish(&mut core, "a", TaskOutcome::Success);

        assert!(!step.keep_running);
        assert!(matches!(step.commands.last(), Some(CoreCommand::RequestExit)));
    }

    #[test]
    fn reopening_a_completed_run_dispatches_again() {
        let mut core = core();
        start(&mut core, vec![Task::new("a", "a")]);
        finish(&mut core, "a", TaskOutcome::Success);
        assert_eq!(core.state().status(), RunStatus::Completed);

        let step = core.step(
            Command::SetTaskStatus {
                task: "a".into(),
                status: TaskStatus::Pending,
            }
            .into(),
        );
        assert_eq!(core.state().status(), RunStatus::Running);
        assert_eq!(dispatched(&step), vec!["a"]);
    }

    #[test]
    fn external_completion_of_in_flight_task_ignores_late_result() {
        let mut core = core();
        start(&mut core, vec![Task::new("a", "a"), Task::new("b", "b")]);

        let step = core.step(
            Command::SetTaskStatus {
                task: "a".into(),
                status: TaskStatus::Completed,
            }
            .into(),
        );
        assert_eq!(dispatched(&step), vec!["b"]);

        let step = finish(&mut core, "a", TaskOutcome::failed("late"));
        assert!(step.commands.is_empty());
        assert_eq!(core.state().failed_count(), 0);
        assert_eq!(core.state().current_task(), Some("b"));
    }
}
