#![allow(dead_code)]

use agentflow::engine::{ExecutionSnapshot, RuntimeHandle, RuntimeOptions};
use agentflow::events::EventBus;
use agentflow::types::RunStatus;

pub use agentflow_test_utils::{
    FakeExecutor, ProjectFileBuilder, TaskBuilder, chain, history_kinds, history_of,
    init_tracing, with_timeout,
};

/// Spawn a runtime around `executor` with a fresh bus.
pub fn spawn(executor: &FakeExecutor) -> (RuntimeHandle, EventBus) {
    let bus = EventBus::default();
    let handle = agentflow::spawn_runtime(executor.clone(), bus.clone(), RuntimeOptions::default());
    (handle, bus)
}

/// Wait until the run reports `completed`.
pub async fn until_completed(handle: &RuntimeHandle) -> ExecutionSnapshot {
    with_timeout(handle.wait_until(|s| s.state.status() == RunStatus::Completed))
        .await
        .expect("runtime closed before the run completed")
}
