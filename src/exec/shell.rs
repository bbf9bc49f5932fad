// src/exec/shell.rs

//! Shell command executor used by the `agentflow` binary.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::dag::{ScheduledTask, TaskId};
use crate::engine::TaskOutcome;

use super::backend::{ExecFuture, TaskExecutor};

/// Runs the shell command configured for each task id.
///
/// Exit status 0 is success; anything else, a spawn error, or a task with no
/// configured command is a failure.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor {
    commands: Arc<HashMap<TaskId, String>>,
    working_dir: Option<PathBuf>,
}

impl ShellExecutor {
    pub fn new(commands: HashMap<TaskId, String>) -> Self {
        Self {
            commands: Arc::new(commands),
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn command_for(&self, task: &str) -> Option<&str> {
        self.commands.get(task).map(String::as_str)
    }
}

impl TaskExecutor for ShellExecutor {
    fn execute(&self, task: ScheduledTask) -> ExecFuture {
        let cmd = self.commands.get(&task.id).cloned();
        let working_dir = self.working_dir.clone();

        Box::pin(async move {
            let Some(cmd) = cmd else {
                error!(task = %task.id, run_id = task.run_id, "no command configured for task");
                return TaskOutcome::failed(format!("no command configured for task '{}'", task.id));
            };

            match run_command(&task, &cmd, working_dir).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(task = %task.id, run_id = task.run_id, error = %err, "task execution error");
                    TaskOutcome::failed(format!("{err:#}"))
                }
            }
        })
    }
}

async fn run_command(
    task: &ScheduledTask,
    cmd: &str,
    working_dir: Option<PathBuf>,
) -> Result<TaskOutcome> {
    info!(task = %task.id, run_id = task.run_id, cmd = %cmd, "starting task process");

    // Build a shell command appropriate for the platform.
    let mut command = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    };
    if let Some(dir) = working_dir {
        command.current_dir(dir);
    }

    command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .with_context(|| format!("spawning process for task '{}'", task.id))?;

    if let Some(stdout) = child.stdout.take() {
        let id = task.id.clone();
        let run_id = task.run_id;
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %id, run_id, "stdout: {}", line);
            }
        });
    }

    // Keep the last stderr line for the failure message.
    let stderr_tail = child.stderr.take().map(|stderr| {
        let id = task.id.clone();
        let run_id = task.run_id;
        tokio::spawn(async move {
            let mut last = None;
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %id, run_id, "stderr: {}", line);
                if !line.trim().is_empty() {
                    last = Some(line);
                }
            }
            last
        })
    });

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for process of task '{}'", task.id))?;

    let tail = match stderr_tail {
        Some(handle) => handle.await.ok().flatten(),
        None => None,
    };

    info!(
        task = %task.id,
        run_id = task.run_id,
        exit_code = ?status.code(),
        success = status.success(),
        "task process exited"
    );

    if status.success() {
        return Ok(TaskOutcome::Success);
    }

    let code = status
        .code()
        .map_or_else(|| "terminated by signal".to_string(), |c| format!("exit code {c}"));
    Ok(TaskOutcome::Failed(match tail {
        Some(line) => format!("{code}: {line}"),
        None => code,
    }))
}
