// src/dag/resolver.rs

//! Dependency resolution: topological execution order with priority
//! tie-breaking, blocking-task lookup and next-runnable selection.
//!
//! Everything here is a pure function over a task slice; callers own the
//! tasks and decide what to do with the answers.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use tracing::{debug, trace};

use crate::dag::graph::DagGraph;
use crate::dag::task::Task;
use crate::errors::{OrchestratorError, Result};
use crate::types::TaskStatus;

/// Compute a valid execution order using Kahn's algorithm.
///
/// The ready queue is ordered by `(priority rank, input position)`, so among
/// tasks whose dependencies are all satisfied, `critical` runs before `high`
/// before `medium` before `low`, and equal priorities keep input order.
/// Dependencies on ids outside `tasks` are ignored.
///
/// Fails with [`OrchestratorError::CyclicDependency`] naming every task the
/// peel never reached (in input order).
pub fn compute_order(tasks: &[Task]) -> Result<Vec<&Task>> {
    let index: HashMap<&str, usize> = tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.id.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; tasks.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];

    for (i, task) in tasks.iter().enumerate() {
        for dep in &task.dependencies {
            match index.get(dep.as_str()) {
                Some(&d) => {
                    in_degree[i] += 1;
                    dependents[d].push(i);
                }
                None => {
                    trace!(task = %task.id, dep = %dep, "ignoring dependency on unknown task");
                }
            }
        }
    }

    // Min-heap on (rank, position): popping it is equivalent to re-sorting
    // the whole ready queue on every insertion and taking the front.
    let mut ready: BinaryHeap<Reverse<(u8, usize)>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse((tasks[i].priority.rank(), i)))
        .collect();

    let mut processed = vec![false; tasks.len()];
    let mut order = Vec::with_capacity(tasks.len());

    while let Some(Reverse((_, i))) = ready.pop() {
        processed[i] = true;
        order.push(&tasks[i]);

        for &dependent in &dependents[i] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(Reverse((tasks[dependent].priority.rank(), dependent)));
            }
        }
    }

    if order.len() < tasks.len() {
        let unresolved: Vec<String> = tasks
            .iter()
            .zip(processed.iter())
            .filter(|(_, done)| !**done)
            .map(|(t, _)| t.id.clone())
            .collect();
        let cycles = DagGraph::from_tasks(tasks).cycles();

        debug!(?unresolved, ?cycles, "dependency graph contains a cycle");
        return Err(OrchestratorError::CyclicDependency {
            tasks: unresolved,
            cycles,
        });
    }

    Ok(order)
}

/// Dependencies of `task_id` that exist in `tasks` and are not completed.
///
/// Unknown task ids have no blockers.
pub fn blocking_tasks<'a>(tasks: &'a [Task], task_id: &str) -> Vec<&'a Task> {
    let Some(task) = tasks.iter().find(|t| t.id == task_id) else {
        debug!(task = %task_id, "blocking_tasks: unknown task");
        return Vec::new();
    };

    task.dependencies
        .iter()
        .filter_map(|dep| tasks.iter().find(|t| &t.id == dep))
        .filter(|dep| dep.status != TaskStatus::Completed)
        .collect()
}

/// First task in execution order that is neither settled nor running and has
/// no blocking tasks. `Ok(None)` means the run is finished or blocked.
pub fn next_executable_task(tasks: &[Task]) -> Result<Option<&Task>> {
    let order = compute_order(tasks)?;
    Ok(first_executable(tasks, order))
}

/// Same as [`next_executable_task`] but reuses an order computed earlier.
pub(crate) fn first_executable<'a>(
    tasks: &'a [Task],
    order: impl IntoIterator<Item = &'a Task>,
) -> Option<&'a Task> {
    order.into_iter().find(|task| {
        !task.status.is_settled_or_running() && blocking_tasks(tasks, &task.id).is_empty()
    })
}
