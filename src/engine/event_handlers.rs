// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.
//!
//! Each handler mutates the [`CoreRuntime`] through the `ExecutionState`
//! transitions and returns the commands the shell must carry out. After any
//! handler that may free the scheduler slot, [`advance`] picks the next
//! runnable task or settles the run as completed or blocked.

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::dag::resolver::first_executable;
use crate::dag::{ScheduledTask, Task, TaskId, blocking_tasks, compute_order};
use crate::engine::core::CoreRuntime;
use crate::engine::state::ExecutionState;
use crate::engine::TaskOutcome;
use crate::errors::{OrchestratorError, Result};
use crate::events::EventKind;
use crate::types::{RunStatus, TaskStatus};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Hand this task to the executor.
    Dispatch(ScheduledTask),
    /// Publish a lifecycle event on the bus.
    Emit {
        kind: EventKind,
        payload: Value,
        correlation_id: Option<String>,
    },
    /// Request that the runtime loop exits (run finished with
    /// `exit_when_finished`).
    RequestExit,
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
    /// Rejection to hand back to whoever issued the command.
    pub error: Option<OrchestratorError>,
}

impl CoreStep {
    fn ok(commands: Vec<CoreCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
            error: None,
        }
    }

    fn rejected(error: OrchestratorError) -> Self {
        Self {
            commands: Vec::new(),
            keep_running: true,
            error: Some(error),
        }
    }
}

fn emit(core: &CoreRuntime, kind: EventKind, payload: Value) -> CoreCommand {
    CoreCommand::Emit {
        kind,
        payload,
        correlation_id: core.state.project_id().map(str::to_string),
    }
}

fn invalid(core: &CoreRuntime, action: &'static str) -> CoreStep {
    let from = core.state.status();
    debug!(%from, action, "rejecting lifecycle command");
    CoreStep::rejected(OrchestratorError::InvalidTransition { from, action })
}

/// `idle`/`completed` → `running`, or stays `idle` on a cyclic task set or
/// one with duplicate ids.
pub fn handle_start(core: &mut CoreRuntime, project_id: String, mut tasks: Vec<Task>) -> CoreStep {
    if matches!(core.state.status(), RunStatus::Running | RunStatus::Paused) {
        return invalid(core, "start");
    }

    let order = match order_positions(&tasks) {
        Ok(order) => order,
        Err(err) => {
            warn!(project = %project_id, error = %err, "refusing to start run");
            let unresolved = match &err {
                OrchestratorError::CyclicDependency { tasks: names, .. } => names.clone(),
                OrchestratorError::DuplicateTask(id) => vec![id.clone()],
                _ => Vec::new(),
            };
            core.tasks = tasks;
            core.order.clear();
            core.attempts.clear();
            core.state = ExecutionState::rejected(&project_id, err.to_string());
            let event = emit(
                core,
                EventKind::ExecutionError,
                json!({
                    "projectId": project_id,
                    "error": err.to_string(),
                    "tasks": unresolved,
                    "fatal": true,
                }),
            );
            return CoreStep {
                commands: vec![event],
                keep_running: true,
                error: Some(err),
            };
        }
    };

    // Nothing is in flight at the start of a run.
    for task in tasks.iter_mut().filter(|t| t.status == TaskStatus::InProgress) {
        task.status = TaskStatus::Pending;
    }

    core.run_counter += 1;
    let run_id = core.run_counter;
    core.state = ExecutionState::begin(&project_id, run_id, &tasks);
    core.tasks = tasks;
    core.order = order;
    core.attempts.clear();

    info!(project = %project_id, run_id, tasks = core.tasks.len(), "run started");

    let order_ids: Vec<&str> = core.execution_order().iter().map(|t| t.id.as_str()).collect();
    let mut commands = vec![emit(
        core,
        EventKind::ExecutionStarted,
        json!({
            "projectId": project_id,
            "runId": run_id,
            "totalTasks": core.tasks.len(),
            "order": order_ids,
        }),
    )];
    let keep_running = advance(core, &mut commands);

    CoreStep {
        commands,
        keep_running,
        error: None,
    }
}

/// Positions into `tasks` in execution order. Ids must be unique.
fn order_positions(tasks: &[Task]) -> Result<Vec<usize>> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(tasks.len());
    for (i, task) in tasks.iter().enumerate() {
        if index.insert(task.id.as_str(), i).is_some() {
            return Err(OrchestratorError::DuplicateTask(task.id.clone()));
        }
    }
    Ok(compute_order(tasks)?
        .iter()
        .filter_map(|t| index.get(t.id.as_str()).copied())
        .collect())
}

pub fn handle_pause(core: &mut CoreRuntime) -> CoreStep {
    if core.state.status() != RunStatus::Running {
        return invalid(core, "pause");
    }
    core.state.pause();
    info!(run_id = core.state.run_id(), "run paused");
    let event = emit(
        core,
        EventKind::ExecutionPaused,
        json!({ "currentTask": core.state.current_task() }),
    );
    CoreStep::ok(vec![event])
}

pub fn handle_resume(core: &mut CoreRuntime) -> CoreStep {
    if core.state.status() != RunStatus::Paused {
        return invalid(core, "resume");
    }
    core.state.resume();
    info!(run_id = core.state.run_id(), "run resumed");
    let mut commands = vec![emit(core, EventKind::ExecutionResumed, json!({}))];
    let keep_running = advance(core, &mut commands);
    CoreStep {
        commands,
        keep_running,
        error: None,
    }
}

pub fn handle_stop(core: &mut CoreRuntime) -> CoreStep {
    if !matches!(core.state.status(), RunStatus::Running | RunStatus::Paused) {
        return invalid(core, "stop");
    }
    let interrupted = core.state.current_task().map(str::to_string);
    core.state.stop();
    info!(run_id = core.state.run_id(), interrupted = ?interrupted, "run stopped");
    let event = emit(
        core,
        EventKind::ExecutionStopped,
        json!({
            "interruptedTask": interrupted,
            "completed": core.state.completed_count(),
            "failed": core.state.failed_count(),
        }),
    );
    CoreStep::ok(vec![event])
}

/// Always allowed. Forgets the task set; results still in flight carry a
/// stale run id and are dropped when they arrive.
pub fn handle_reset(core: &mut CoreRuntime) -> CoreStep {
    let correlation_id = core.state.project_id().map(str::to_string);
    let previous = core.state.status();
    core.state.reset();
    core.tasks.clear();
    core.order.clear();
    core.attempts.clear();
    info!(%previous, "execution state reset");
    CoreStep::ok(vec![CoreCommand::Emit {
        kind: EventKind::ExecutionReset,
        payload: json!({ "previousStatus": previous }),
        correlation_id,
    }])
}

/// Route an externally delivered status change through the transitions.
pub fn handle_set_status(core: &mut CoreRuntime, task_id: &str, status: TaskStatus) -> CoreStep {
    let Some(task) = core.tasks.iter_mut().find(|t| t.id == task_id) else {
        return CoreStep::rejected(OrchestratorError::TaskNotFound(task_id.to_string()));
    };

    let from = task.status;
    if from == status {
        return CoreStep::ok(Vec::new());
    }

    task.status = status;
    match status {
        TaskStatus::Completed => {
            task.progress = 100;
            task.completed_at = Some(Utc::now());
        }
        TaskStatus::InProgress => task.started_at = Some(Utc::now()),
        TaskStatus::Pending => {
            task.progress = 0;
            task.completed_at = None;
        }
        TaskStatus::Failed | TaskStatus::Cancelled => task.completed_at = Some(Utc::now()),
        TaskStatus::Blocked => {}
    }

    match status {
        TaskStatus::Completed => core.state.mark_completed(task_id),
        TaskStatus::Failed => core.state.mark_failed(task_id, "marked failed externally"),
        TaskStatus::Cancelled => core.state.mark_cancelled(task_id),
        TaskStatus::Pending => core.state.mark_requeued(task_id),
        TaskStatus::Blocked => core.state.mark_blocked(task_id),
        TaskStatus::InProgress => core.state.mark_running_elsewhere(task_id),
    }
    core.state.note_status_change(task_id, from, status);
    info!(task = %task_id, %from, to = %status, "task status changed externally");

    let mut commands = vec![emit(
        core,
        EventKind::TaskStatusChanged,
        json!({ "taskId": task_id, "from": from, "to": status }),
    )];

    if core.state.status() == RunStatus::Completed && !status.is_terminal() {
        core.state.reopen();
        info!(task = %task_id, "completed run reopened");
    }

    let keep_running = advance(core, &mut commands);
    CoreStep {
        commands,
        keep_running,
        error: None,
    }
}

/// Fold an executor result into state. Results from an older run, or from
/// an attempt superseded by a later dispatch of the same task, are dropped.
pub fn handle_task_finished(
    core: &mut CoreRuntime,
    task_id: &str,
    run_id: u64,
    attempt: u32,
    outcome: TaskOutcome,
) -> CoreStep {
    if run_id != core.state.run_id() {
        debug!(task = %task_id, run_id, current = core.state.run_id(), "ignoring result from stale run");
        return CoreStep::ok(Vec::new());
    }

    let latest = core.attempts.get(task_id).copied().unwrap_or(0);
    if attempt != latest {
        debug!(task = %task_id, run_id, attempt, latest, "ignoring result from superseded attempt");
        return CoreStep::ok(Vec::new());
    }

    let Some(task) = core.tasks.iter_mut().find(|t| t.id == task_id) else {
        warn!(task = %task_id, run_id, "result for unknown task");
        return CoreStep::ok(Vec::new());
    };

    let mut commands = Vec::new();

    if task.status != TaskStatus::InProgress {
        debug!(task = %task_id, status = %task.status, "task changed while in flight; ignoring result");
        core.state.release_current(task_id);
        let keep_running = advance(core, &mut commands);
        return CoreStep {
            commands,
            keep_running,
            error: None,
        };
    }

    task.completed_at = Some(Utc::now());
    match outcome {
        TaskOutcome::Success => {
            task.status = TaskStatus::Completed;
            task.progress = 100;
            core.state.mark_completed(task_id);
            info!(task = %task_id, run_id, progress = core.state.progress(), "task completed");
            commands.push(emit(
                core,
                EventKind::TaskCompleted,
                json!({
                    "taskId": task_id,
                    "runId": run_id,
                    "progress": core.state.progress(),
                }),
            ));
        }
        TaskOutcome::Failed(message) => {
            task.status = TaskStatus::Failed;
            core.state.mark_failed(task_id, &message);
            warn!(task = %task_id, run_id, error = %message, "task failed");
            commands.push(emit(
                core,
                EventKind::TaskFailed,
                json!({ "taskId": task_id, "runId": run_id, "error": message }),
            ));
        }
    }

    let keep_running = advance(core, &mut commands);
    CoreStep {
        commands,
        keep_running,
        error: None,
    }
}

/// Dispatch the next runnable task, or settle the run as completed or
/// blocked. Only acts while `running` with no task in flight. Returns
/// whether the runtime loop should keep going.
fn advance(core: &mut CoreRuntime, commands: &mut Vec<CoreCommand>) -> bool {
    if core.state.status() != RunStatus::Running || core.state.current_task().is_some() {
        return true;
    }

    let next = first_executable(&core.tasks, core.order.iter().map(|&i| &core.tasks[i]))
        .map(|t| t.id.clone());

    if let Some(id) = next {
        dispatch(core, &id, commands);
        return true;
    }

    if core.tasks.iter().all(|t| t.status.is_terminal()) {
        core.state.finish();
        info!(
            run_id = core.state.run_id(),
            completed = core.state.completed_count(),
            failed = core.state.failed_count(),
            "run completed"
        );
        commands.push(emit(
            core,
            EventKind::ExecutionCompleted,
            json!({
                "runId": core.state.run_id(),
                "completed": core.state.completed_count(),
                "failed": core.state.failed_count(),
                "total": core.state.total_tasks(),
                "progress": core.state.progress(),
            }),
        ));
        if core.options.exit_when_finished {
            commands.push(CoreCommand::RequestExit);
            return false;
        }
        return true;
    }

    settle_blocked(core, commands);
    true
}

fn dispatch(core: &mut CoreRuntime, task_id: &str, commands: &mut Vec<CoreCommand>) {
    let run_id = core.state.run_id();
    let Some(task) = core.tasks.iter_mut().find(|t| t.id == task_id) else {
        return;
    };
    task.status = TaskStatus::InProgress;
    task.started_at = Some(Utc::now());
    let attempt = core.attempts.entry(task.id.clone()).or_insert(0);
    *attempt += 1;
    let scheduled = ScheduledTask::from_task(task, run_id, *attempt);

    core.state.mark_dispatched(task_id);
    info!(task = %task_id, run_id, attempt = scheduled.attempt, "dispatching task");

    commands.push(emit(
        core,
        EventKind::TaskStarted,
        json!({
            "taskId": task_id,
            "title": scheduled.title,
            "runId": run_id,
            "attempt": scheduled.attempt,
        }),
    ));
    commands.push(CoreCommand::Dispatch(scheduled));
}

/// Nothing runnable and not everything terminal: mark every waiting task
/// as blocked and announce the set once per change.
fn settle_blocked(core: &mut CoreRuntime, commands: &mut Vec<CoreCommand>) {
    let mut waiting_on: Vec<(TaskId, Vec<TaskId>)> = Vec::new();
    for task in &core.tasks {
        if task.status.is_settled_or_running() {
            continue;
        }
        let blockers: Vec<TaskId> = blocking_tasks(&core.tasks, &task.id)
            .into_iter()
            .map(|t| t.id.clone())
            .collect();
        if !blockers.is_empty() {
            waiting_on.push((task.id.clone(), blockers));
        }
    }

    let ids: BTreeSet<TaskId> = waiting_on.iter().map(|(id, _)| id.clone()).collect();
    for task in core.tasks.iter_mut().filter(|t| ids.contains(&t.id)) {
        task.status = TaskStatus::Blocked;
    }

    if core.state.set_blocked(ids.clone()) && !ids.is_empty() {
        warn!(blocked = ?ids, "run is blocked; waiting for a status change");
        let detail: serde_json::Map<String, Value> = waiting_on
            .into_iter()
            .map(|(id, blockers)| (id, json!(blockers)))
            .collect();
        commands.push(emit(
            core,
            EventKind::ExecutionBlocked,
            json!({ "blocked": ids, "waitingOn": detail }),
        ));
    }
}
