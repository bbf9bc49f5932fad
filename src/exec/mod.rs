// src/exec/mod.rs

//! Task execution layer.
//!
//! - [`backend`] provides the `TaskExecutor` trait the runtime dispatches to,
//!   which tests replace with a fake implementation.
//! - [`shell`] runs a configured shell command per task using
//!   `tokio::process::Command`.

pub mod backend;
pub mod shell;

pub use backend::{ExecFuture, TaskExecutor};
pub use shell::ShellExecutor;
