use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentflow::dag::ScheduledTask;
use agentflow::engine::TaskOutcome;
use agentflow::exec::{ExecFuture, TaskExecutor};
use tokio::sync::{oneshot, watch};

#[derive(Debug, Clone)]
enum Script {
    Fail { message: String, once: bool },
    Panic,
}

#[derive(Debug)]
struct Inner {
    executed: Mutex<Vec<ScheduledTask>>,
    scripts: Mutex<HashMap<String, Script>>,
    /// In gated mode every dispatched task waits here until released.
    gates: Mutex<HashMap<String, oneshot::Sender<TaskOutcome>>>,
    gated: bool,
    delay: Option<Duration>,
    dispatches: watch::Sender<usize>,
}

/// A fake executor that:
/// - records which tasks were dispatched, in order
/// - succeeds immediately unless a failure or panic is scripted for the task
/// - in gated mode, holds every task until the test calls [`FakeExecutor::release`]
///
/// Clones share state, so keep one in the test and hand one to the runtime.
#[derive(Debug, Clone)]
pub struct FakeExecutor {
    inner: Arc<Inner>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::build(false, None)
    }

    /// Every task stays in flight until released.
    pub fn gated() -> Self {
        Self::build(true, None)
    }

    /// Every task sleeps for `delay` before reporting.
    pub fn with_delay(delay: Duration) -> Self {
        Self::build(false, Some(delay))
    }

    fn build(gated: bool, delay: Option<Duration>) -> Self {
        let (dispatches, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                executed: Mutex::new(Vec::new()),
                scripts: Mutex::new(HashMap::new()),
                gates: Mutex::new(HashMap::new()),
                gated,
                delay,
                dispatches,
            }),
        }
    }

    /// `task` fails every time it runs.
    pub fn fail(&self, task: &str, message: &str) -> &Self {
        self.script(task, Script::Fail {
            message: message.to_string(),
            once: false,
        })
    }

    /// `task` fails on its next run only, so a retry succeeds.
    pub fn fail_once(&self, task: &str, message: &str) -> &Self {
        self.script(task, Script::Fail {
            message: message.to_string(),
            once: true,
        })
    }

    /// The executor future for `task` panics.
    pub fn panic_on(&self, task: &str) -> &Self {
        self.script(task, Script::Panic)
    }

    fn script(&self, task: &str, script: Script) -> &Self {
        self.inner
            .scripts
            .lock()
            .unwrap()
            .insert(task.to_string(), script);
        self
    }

    /// Ids of dispatched tasks, in dispatch order.
    pub fn executed(&self) -> Vec<String> {
        self.inner
            .executed
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn executed_tasks(&self) -> Vec<ScheduledTask> {
        self.inner.executed.lock().unwrap().clone()
    }

    /// Wait until at least `count` tasks have been dispatched.
    pub async fn wait_for_dispatches(&self, count: usize) {
        let mut rx = self.inner.dispatches.subscribe();
        rx.wait_for(|n| *n >= count)
            .await
            .expect("executor dropped");
    }

    /// Finish a gated task. Returns `false` if `task` is not waiting.
    pub fn release(&self, task: &str, outcome: TaskOutcome) -> bool {
        let gate = self.inner.gates.lock().unwrap().remove(task);
        match gate {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Ids of gated tasks still waiting for release.
    pub fn in_flight(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.gates.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for FakeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskExecutor for FakeExecutor {
    fn execute(&self, task: ScheduledTask) -> ExecFuture {
        let id = task.id.clone();
        self.inner.executed.lock().unwrap().push(task);

        let script = {
            let mut scripts = self.inner.scripts.lock().unwrap();
            let script = scripts.get(&id).cloned();
            if let Some(Script::Fail { once: true, .. }) = &script {
                scripts.remove(&id);
            }
            script
        };

        let gate = if self.inner.gated {
            let (tx, rx) = oneshot::channel();
            self.inner.gates.lock().unwrap().insert(id.clone(), tx);
            Some(rx)
        } else {
            None
        };

        // Registered before counting, so a waiter can release right away.
        self.inner.dispatches.send_modify(|n| *n += 1);
        let delay = self.inner.delay;

        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(rx) = gate {
                return rx
                    .await
                    .unwrap_or_else(|_| TaskOutcome::failed("gate dropped"));
            }
            match script {
                Some(Script::Panic) => panic!("scripted panic in task {id}"),
                Some(Script::Fail { message, .. }) => TaskOutcome::Failed(message),
                None => TaskOutcome::Success,
            }
        })
    }
}
