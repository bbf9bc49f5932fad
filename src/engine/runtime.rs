// src/engine/runtime.rs

use std::fmt;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::dag::{ScheduledTask, Task, TaskId};
use crate::errors::{OrchestratorError, Result};
use crate::events::{EmitOptions, EventBus};
use crate::exec::TaskExecutor;
use crate::types::TaskStatus;

use super::core::{CoreRuntime, ExecutionSnapshot};
use super::state::ExecutionState;
use super::{Command, CoreCommand, RuntimeEvent, TaskOutcome};

const INBOX_CAPACITY: usize = 256;

/// Reply channel for a command issued through a [`RuntimeHandle`].
type Reply = oneshot::Sender<Result<()>>;

#[derive(Debug)]
struct Envelope {
    event: RuntimeEvent,
    reply: Option<Reply>,
}

/// Drives the scheduler core in response to `RuntimeEvent`s, hands
/// dispatched tasks to a `TaskExecutor` and publishes lifecycle events on
/// the bus.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// scheduling semantics. Everything that mutates execution state goes
/// through the single loop in [`Runtime::run`].
pub struct Runtime<E: TaskExecutor> {
    core: CoreRuntime,
    inbox: mpsc::Receiver<Envelope>,
    /// Executor results come back through here. Weak, so the loop ends once
    /// every handle is gone.
    results: mpsc::WeakSender<Envelope>,
    executor: E,
    bus: EventBus,
    snapshot_tx: watch::Sender<ExecutionSnapshot>,
}

impl<E: TaskExecutor> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<E: TaskExecutor> Runtime<E> {
    pub fn new(core: CoreRuntime, bus: EventBus, executor: E) -> (Self, RuntimeHandle) {
        let (tx, inbox) = mpsc::channel(INBOX_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(core.snapshot());

        let handle = RuntimeHandle {
            tx: tx.clone(),
            snapshot: snapshot_rx,
            bus: bus.clone(),
        };
        let runtime = Self {
            core,
            inbox,
            results: tx.downgrade(),
            executor,
            bus,
            snapshot_tx,
        };
        (runtime, handle)
    }

    /// Main event loop.
    ///
    /// - Consumes envelopes from the inbox.
    /// - Feeds them into the core.
    /// - Executes the commands returned by the core (dispatch, emit, exit),
    ///   then publishes the new snapshot and answers the caller. Handlers
    ///   therefore see the previous snapshot; the event payload carries what
    ///   changed.
    pub async fn run(mut self) -> Result<()> {
        info!("agentflow runtime started");

        while let Some(Envelope { event, reply }) = self.inbox.recv().await {
            debug!(?event, "runtime received event");

            let step = self.core.step(event);
            for command in step.commands {
                self.execute_command(command).await;
            }
            self.snapshot_tx.send_replace(self.core.snapshot());

            match (reply, step.error) {
                (Some(reply), error) => {
                    // The caller may have given up waiting.
                    let _ = reply.send(error.map_or(Ok(()), Err));
                }
                (None, Some(error)) => {
                    warn!(error = %error, "command without reply was rejected");
                }
                (None, None) => {}
            }

            if !step.keep_running {
                info!("core requested exit; stopping runtime");
                break;
            }
        }

        info!("runtime exiting");
        Ok(())
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) {
        match command {
            CoreCommand::Dispatch(task) => self.dispatch(task),
            CoreCommand::Emit {
                kind,
                payload,
                correlation_id,
            } => {
                let options = match correlation_id {
                    Some(id) => EmitOptions::default().with_correlation_id(id),
                    None => EmitOptions::default(),
                };
                self.bus.emit(kind, payload, options).await;
            }
            CoreCommand::RequestExit => {
                info!("core issued RequestExit command");
            }
        }
    }

    /// Run the executor future on its own task and feed the outcome back
    /// into the inbox. A panicking executor counts as a failed task.
    fn dispatch(&self, task: ScheduledTask) {
        let Some(results) = self.results.upgrade() else {
            warn!(task = %task.id, "runtime inbox closed; not dispatching");
            return;
        };

        debug!(task = %task.id, run_id = task.run_id, "handing task to executor");
        let id = task.id.clone();
        let run_id = task.run_id;
        let attempt = task.attempt;
        let work = self.executor.execute(task);

        tokio::spawn(async move {
            let outcome = match tokio::spawn(work).await {
                Ok(outcome) => outcome,
                Err(err) if err.is_panic() => TaskOutcome::failed("executor panicked"),
                Err(err) => TaskOutcome::failed(format!("executor task aborted: {err}")),
            };
            let envelope = Envelope {
                event: RuntimeEvent::TaskFinished {
                    task: id.clone(),
                    run_id,
                    attempt,
                    outcome,
                },
                reply: None,
            };
            if results.send(envelope).await.is_err() {
                debug!(task = %id, run_id, "runtime gone; dropping task result");
            }
        });
    }
}

/// Cloneable handle to a running [`Runtime`]: lifecycle commands, queries
/// and change notification.
///
/// Lifecycle calls wait until the runtime has applied the command and
/// finished publishing the resulting events. Event handlers run inside that
/// publication, so a handler must use [`RuntimeHandle::notify`] rather than
/// awaiting a lifecycle call.
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    tx: mpsc::Sender<Envelope>,
    snapshot: watch::Receiver<ExecutionSnapshot>,
    bus: EventBus,
}

impl RuntimeHandle {
    async fn request(&self, event: RuntimeEvent) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                event,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| OrchestratorError::RuntimeClosed)?;
        reply_rx.await.map_err(|_| OrchestratorError::RuntimeClosed)?
    }

    /// Validate the task set and begin a run. A cyclic set leaves the run
    /// `idle` and returns `CyclicDependency`.
    pub async fn start(&self, project_id: impl Into<String>, tasks: Vec<Task>) -> Result<()> {
        self.request(
            Command::Start {
                project_id: project_id.into(),
                tasks,
            }
            .into(),
        )
        .await
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(Command::Pause.into()).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.request(Command::Resume.into()).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.request(Command::Stop.into()).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.request(Command::Reset.into()).await
    }

    pub async fn set_task_status(&self, task: impl Into<TaskId>, status: TaskStatus) -> Result<()> {
        self.request(
            Command::SetTaskStatus {
                task: task.into(),
                status,
            }
            .into(),
        )
        .await
    }

    /// Put a failed or cancelled task back to `pending`.
    pub async fn retry_task(&self, task: impl Into<TaskId>) -> Result<()> {
        self.set_task_status(task, TaskStatus::Pending).await
    }

    /// Stop the runtime loop. In-flight executor work is not cancelled.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(RuntimeEvent::ShutdownRequested).await
    }

    /// Queue a command without waiting for it to be applied. Rejections
    /// are logged by the runtime. Safe to call from event handlers.
    pub fn notify(&self, command: Command) -> Result<()> {
        self.tx
            .try_send(Envelope {
                event: command.into(),
                reply: None,
            })
            .map_err(|err| match err {
                mpsc::error::TrySendError::Closed(_) => OrchestratorError::RuntimeClosed,
                mpsc::error::TrySendError::Full(_) => {
                    OrchestratorError::Other(anyhow::anyhow!("runtime inbox is full"))
                }
            })
    }

    // ---- queries -----------------------------------------------------------

    pub fn snapshot(&self) -> ExecutionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> ExecutionState {
        self.snapshot.borrow().state.clone()
    }

    pub fn next_executable_task(&self) -> Result<Option<Task>> {
        Ok(self.snapshot.borrow().next_executable_task()?.cloned())
    }

    pub fn blocking_tasks(&self, task_id: &str) -> Vec<Task> {
        self.snapshot
            .borrow()
            .blocking_tasks(task_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn execution_order(&self) -> Result<Vec<Task>> {
        Ok(self
            .snapshot
            .borrow()
            .execution_order()?
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn task_by_id(&self, task_id: &str) -> Option<Task> {
        self.snapshot.borrow().task_by_id(task_id).cloned()
    }

    /// Change notification: a fresh snapshot is published after every
    /// command and executor result.
    pub fn subscribe(&self) -> watch::Receiver<ExecutionSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until a published snapshot satisfies `predicate`.
    pub async fn wait_until(
        &self,
        mut predicate: impl FnMut(&ExecutionSnapshot) -> bool,
    ) -> Result<ExecutionSnapshot> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| OrchestratorError::RuntimeClosed)?;
        Ok(snapshot.clone())
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }
}
