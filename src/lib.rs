// src/lib.rs

pub mod board;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod events;
pub mod exec;
pub mod logging;
pub mod storage;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, error, info, warn};

use crate::board::FeatureBoard;
use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ProjectConfig;
use crate::dag::compute_order;
use crate::engine::{CoreRuntime, ExecutionSnapshot, Runtime, RuntimeHandle, RuntimeOptions};
use crate::events::{Event, EventBus, handler};
use crate::exec::ShellExecutor;
use crate::storage::InMemoryRepository;
use crate::types::{FeatureStatus, RunStatus, TaskStatus};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - project file loading
/// - event bus and feature board
/// - scheduler runtime with the shell executor
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let project_path = PathBuf::from(&args.project);
    let cfg = load_and_validate(&project_path)
        .with_context(|| format!("loading project file {}", project_path.display()))?;

    let bus = EventBus::new(cfg.bus_config());
    let board = build_board(&cfg, bus.clone())?;

    if args.dry_run {
        return print_dry_run(&cfg, &board);
    }

    let _event_log = bus.on_any(handler(|event: Arc<Event>| async move {
        info!(
            kind = %event.kind,
            source = %event.source,
            payload = %event.payload,
            "event"
        );
        Ok(())
    }));

    let executor =
        ShellExecutor::new(cfg.commands().clone()).with_working_dir(project_root_dir(&project_path));
    let core = CoreRuntime::new(RuntimeOptions {
        exit_when_finished: true,
    });
    let (runtime, handle) = Runtime::new(core, bus.clone(), executor);
    let runtime_task = tokio::spawn(runtime.run());

    // Ctrl-C → stop the run; the settle wait below then returns.
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            warn!("interrupted; stopping run");
            if let Err(e) = handle.stop().await {
                debug!(error = %e, "stop after Ctrl+C was not applied");
            }
        });
    }

    let started = handle.start(cfg.project_id(), cfg.tasks().to_vec()).await;
    let snapshot = match &started {
        Ok(()) => handle.wait_until(is_settled).await.unwrap_or_else(|_| handle.snapshot()),
        Err(err) => {
            error!(error = %err, "run was not started");
            handle.snapshot()
        }
    };

    if let Err(err) = handle.shutdown().await {
        debug!(error = %err, "runtime already stopped");
    }
    runtime_task.await.context("joining runtime task")??;

    if snapshot.state.status() == RunStatus::Completed {
        close_finished_features(&board, &snapshot).await;
    }

    print_summary(&snapshot, &board, &bus, args.history);

    started.context("starting run")?;
    match snapshot.state.status() {
        RunStatus::Completed if snapshot.state.failed_count() == 0 => Ok(()),
        RunStatus::Completed => bail!("{} task(s) failed", snapshot.state.failed_count()),
        status => Err(anyhow!(
            "run ended while {status} with {} of {} tasks completed",
            snapshot.state.completed_count(),
            snapshot.state.total_tasks()
        )),
    }
}

/// Completed, stopped, or blocked with nothing in flight. The binary has no
/// one to deliver status changes, so a blocked run cannot progress.
fn is_settled(snapshot: &ExecutionSnapshot) -> bool {
    let state = &snapshot.state;
    match state.status() {
        RunStatus::Completed | RunStatus::Idle => true,
        RunStatus::Running => state.current_task().is_none() && state.blocked_count() > 0,
        RunStatus::Paused => false,
    }
}

fn build_board(cfg: &ProjectConfig, bus: EventBus) -> Result<FeatureBoard> {
    let board = FeatureBoard::new(InMemoryRepository::new(), bus)
        .with_wip_limit(cfg.settings().wip_limit);
    for feature in cfg.features() {
        board.add_feature(feature.clone())?;
    }
    Ok(board)
}

/// Move features whose tasks all completed to `done`.
async fn close_finished_features(board: &FeatureBoard, snapshot: &ExecutionSnapshot) {
    for feature in board.features() {
        if feature.status == FeatureStatus::Done || feature.tasks.is_empty() {
            continue;
        }
        let finished = feature.tasks.iter().all(|id| {
            snapshot
                .task_by_id(id)
                .is_some_and(|t| t.status == TaskStatus::Completed)
        });
        if finished && let Err(err) = board.move_feature(&feature.id, FeatureStatus::Done).await {
            warn!(feature = %feature.id, error = %err, "could not close feature");
        }
    }
}

/// Directory the task commands run in: the project file's directory, or the
/// current directory for a bare file name.
fn project_root_dir(project_path: &Path) -> PathBuf {
    match project_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

fn print_dry_run(cfg: &ProjectConfig, board: &FeatureBoard) -> Result<()> {
    println!("agentflow dry-run: project {}", cfg.project_id());
    println!("  settings.wip_limit = {}", cfg.settings().wip_limit);
    println!("  settings.history_capacity = {}", cfg.settings().history_capacity);
    println!();

    let order = compute_order(cfg.tasks())?;
    println!("execution order ({}):", order.len());
    for (i, task) in order.iter().enumerate() {
        println!("  {}. {} [{}] {}", i + 1, task.id, task.priority, task.title);
        if !task.dependencies.is_empty() {
            println!("      after: {:?}", task.dependencies);
        }
        match cfg.commands().get(&task.id) {
            Some(cmd) => println!("      cmd: {cmd}"),
            None => println!("      cmd: (none)"),
        }
        if task.status != TaskStatus::Pending {
            println!("      status: {}", task.status);
        }
    }

    print_board(board);
    debug!("dry-run complete (no execution)");
    Ok(())
}

fn print_board(board: &FeatureBoard) {
    let features = board.features();
    if features.is_empty() {
        return;
    }
    println!();
    println!(
        "features ({}, {} of {} in progress):",
        features.len(),
        board.active_count(),
        board.wip_limit()
    );
    for feature in features {
        println!("  - {} [{}] {}", feature.id, feature.status, feature.title);
        if !feature.tasks.is_empty() {
            println!("      tasks: {:?}", feature.tasks);
        }
    }
}

fn print_summary(snapshot: &ExecutionSnapshot, board: &FeatureBoard, bus: &EventBus, history: usize) {
    let state = &snapshot.state;
    println!(
        "run {}: {} ({} completed, {} failed, {} blocked of {} tasks, {}%)",
        state.run_id(),
        state.status(),
        state.completed_count(),
        state.failed_count(),
        state.blocked_count(),
        state.total_tasks(),
        state.progress()
    );

    for err in state.errors() {
        let scope = err.task_id.as_deref().unwrap_or("run");
        let severity = if err.fatal { "fatal" } else { "error" };
        println!("  {severity} [{scope}]: {}", err.message);
    }

    print_board(board);

    let events = bus.history(history);
    if !events.is_empty() {
        println!();
        println!("last {} events:", events.len());
        for event in events {
            println!(
                "  {} {} {}",
                event.timestamp.format("%H:%M:%S%.3f"),
                event.kind,
                event.payload
            );
        }
    }
}

/// Spawn a runtime loop on the current tokio runtime and return its handle.
/// The loop runs until `shutdown` or until every handle is dropped.
pub fn spawn_runtime<E>(executor: E, bus: EventBus, options: RuntimeOptions) -> RuntimeHandle
where
    E: exec::TaskExecutor,
{
    let (runtime, handle) = Runtime::new(CoreRuntime::new(options), bus, executor);
    tokio::spawn(async move {
        if let Err(err) = runtime.run().await {
            error!(error = %err, "runtime loop failed");
        }
    });
    handle
}
