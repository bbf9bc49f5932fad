// src/exec/backend.rs

//! Pluggable executor abstraction.
//!
//! The runtime hands every dispatched task to a `TaskExecutor` and awaits
//! the returned future on its own tokio task. Production code uses
//! [`ShellExecutor`](super::ShellExecutor); tests provide executors that
//! record dispatches and resolve on demand.

use std::future::Future;
use std::pin::Pin;

use crate::dag::ScheduledTask;
use crate::engine::TaskOutcome;

/// Future returned by [`TaskExecutor::execute`].
pub type ExecFuture = Pin<Box<dyn Future<Output = TaskOutcome> + Send + 'static>>;

/// Trait abstracting how scheduled tasks are executed.
///
/// Duration and failure modes are opaque to the scheduler; it only looks at
/// whether the outcome is a success. The future must not borrow `self`, so
/// implementations clone whatever they need into it. A panic inside the
/// future is reported to the scheduler as a failure.
pub trait TaskExecutor: Send + Sync + 'static {
    fn execute(&self, task: ScheduledTask) -> ExecFuture;
}
