// src/dag/graph.rs

use std::collections::HashMap;

use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;

use crate::dag::task::{Task, TaskId};

/// Direct dependencies of one task that exist in the task set.
#[derive(Debug, Clone, Default)]
struct DagNode {
    deps: Vec<TaskId>,
}

/// Adjacency view of a task set keyed by task id.
///
/// Dependency references that point outside the set are dropped here, so
/// everything built on top of this view ignores dangling edges.
#[derive(Debug, Clone)]
pub struct DagGraph {
    /// Task ids in input order.
    order: Vec<TaskId>,
    nodes: HashMap<TaskId, DagNode>,
}

impl DagGraph {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let mut nodes: HashMap<TaskId, DagNode> = HashMap::new();
        let mut order = Vec::with_capacity(tasks.len());

        for task in tasks {
            if nodes.insert(task.id.clone(), DagNode::default()).is_none() {
                order.push(task.id.clone());
            }
        }

        for task in tasks {
            for dep in &task.dependencies {
                if !nodes.contains_key(dep) {
                    continue;
                }
                if let Some(node) = nodes.get_mut(&task.id) {
                    node.deps.push(dep.clone());
                }
            }
        }

        Self { order, nodes }
    }

    /// Immediate dependencies of a task that exist in the set.
    pub fn dependencies_of(&self, id: &str) -> &[TaskId] {
        self.nodes
            .get(id)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Groups of tasks that depend on each other in a loop.
    ///
    /// Each group is a strongly connected component with more than one task,
    /// or a single task depending on itself. Groups are sorted by the input
    /// position of their first member; members keep input order.
    pub fn cycles(&self) -> Vec<Vec<TaskId>> {
        // Edge direction: dep -> task.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for id in &self.order {
            graph.add_node(id.as_str());
        }
        for id in &self.order {
            for dep in self.dependencies_of(id) {
                graph.add_edge(dep.as_str(), id.as_str(), ());
            }
        }

        let position: HashMap<&str, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let mut cycles: Vec<Vec<TaskId>> = tarjan_scc(&graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|n| graph.contains_edge(*n, *n))
            })
            .map(|mut component| {
                component.sort_by_key(|n| position.get(n).copied().unwrap_or(usize::MAX));
                component.into_iter().map(str::to_string).collect()
            })
            .collect();

        cycles.sort_by_key(|c: &Vec<TaskId>| {
            c.first()
                .and_then(|id| position.get(id.as_str()).copied())
                .unwrap_or(usize::MAX)
        });
        cycles
    }
}
