// src/engine/mod.rs

//! Scheduler engine.
//!
//! This module ties together:
//! - the execution state record ([`state`])
//! - the pure scheduler state machine ([`core`], [`event_handlers`])
//! - the async shell that talks to the executor and the event bus
//!   ([`runtime`])
//!
//! The core consumes [`RuntimeEvent`]s and answers with a [`CoreStep`]; it
//! never touches tokio, channels or the bus. The shell owns all IO.

use crate::dag::{Task, TaskId};
use crate::types::TaskStatus;

/// Outcome of a task as reported by the executor. The scheduler only
/// distinguishes success from failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Failed(String),
}

impl TaskOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        TaskOutcome::Failed(message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success)
    }
}

/// Runtime options used by both the core and the async shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeOptions {
    /// Stop the runtime loop once a run reaches `completed`.
    pub exit_when_finished: bool,
}

/// Lifecycle commands and externally delivered status changes.
#[derive(Debug, Clone)]
pub enum Command {
    Start {
        project_id: String,
        tasks: Vec<Task>,
    },
    Pause,
    Resume,
    Stop,
    Reset,
    /// Status change made outside the scheduler (a user, an agent, the UI).
    SetTaskStatus { task: TaskId, status: TaskStatus },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start { .. } => "start",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Stop => "stop",
            Command::Reset => "reset",
            Command::SetTaskStatus { .. } => "set task status",
        }
    }
}

/// Everything that flows into the core.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    Command(Command),
    /// The executor finished a dispatched task.
    TaskFinished {
        task: TaskId,
        run_id: u64,
        attempt: u32,
        outcome: TaskOutcome,
    },
    /// Graceful shutdown requested (e.g. Ctrl-C, or the host is done).
    ShutdownRequested,
}

impl From<Command> for RuntimeEvent {
    fn from(command: Command) -> Self {
        RuntimeEvent::Command(command)
    }
}

pub mod core;
pub mod event_handlers;
pub mod runtime;
pub mod state;

pub use core::{CoreRuntime, ExecutionSnapshot};
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::{Runtime, RuntimeHandle};
pub use state::{ExecutionError, ExecutionState, HistoryEntry, HistoryKind};
