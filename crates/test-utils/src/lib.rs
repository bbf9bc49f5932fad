pub mod builders;
pub mod fake_executor;

use std::sync::{Arc, Once};
use std::time::Duration;

use agentflow::events::{Event, EventBus, EventKind};
use tracing_subscriber::{EnvFilter, fmt};

pub use builders::{ProjectFileBuilder, TaskBuilder, chain};
pub use fake_executor::FakeExecutor;

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=agentflow=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a future with a 5-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(TEST_TIMEOUT, f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Kinds of the events in the bus history, oldest first.
pub fn history_kinds(bus: &EventBus) -> Vec<EventKind> {
    bus.history(usize::MAX)
        .iter()
        .map(|e| e.kind.clone())
        .collect()
}

/// Events of one kind from the bus history, oldest first.
pub fn history_of(bus: &EventBus, kind: EventKind) -> Vec<Arc<Event>> {
    bus.history(usize::MAX)
        .into_iter()
        .filter(|e| e.kind == kind)
        .collect()
}
