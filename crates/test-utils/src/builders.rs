#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use agentflow::config::{ProjectConfig, parse_project};
use agentflow::dag::Task;
use agentflow::types::{Complexity, Priority, TaskStatus};

/// Builder for `Task` with short names for test tables.
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    /// Title defaults to the id.
    pub fn new(id: &str) -> Self {
        Self {
            task: Task::new(id, id),
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.task.title = title.to_string();
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn complexity(mut self, complexity: Complexity) -> Self {
        self.task.complexity = complexity;
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.dependencies.push(dep.to_string());
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

/// `ids[0] <- ids[1] <- ...`: each task depends on the previous one.
pub fn chain(ids: &[&str]) -> Vec<Task> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| {
            let builder = TaskBuilder::new(id);
            match i.checked_sub(1) {
                Some(prev) => builder.after(ids[prev]).build(),
                None => builder.build(),
            }
        })
        .collect()
}

/// Builder for project TOML, for config and end-to-end tests.
pub struct ProjectFileBuilder {
    project_id: Option<String>,
    settings: Vec<String>,
    tasks: Vec<String>,
    features: Vec<String>,
}

/// TOML basic strings accept JSON string escapes.
fn quote(s: &str) -> String {
    serde_json::to_string(s).expect("string serializes")
}

fn quote_list(items: &[&str]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| quote(s)).collect();
    format!("[{}]", quoted.join(", "))
}

impl ProjectFileBuilder {
    pub fn new() -> Self {
        Self {
            project_id: None,
            settings: Vec::new(),
            tasks: Vec::new(),
            features: Vec::new(),
        }
    }

    pub fn project_id(mut self, id: &str) -> Self {
        self.project_id = Some(id.to_string());
        self
    }

    pub fn wip_limit(mut self, limit: usize) -> Self {
        self.settings.push(format!("wip_limit = {limit}"));
        self
    }

    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.settings.push(format!("history_capacity = {capacity}"));
        self
    }

    /// A task with a command and dependencies.
    pub fn task(self, id: &str, cmd: &str, after: &[&str]) -> Self {
        self.task_with(id, Some(cmd), after, &[])
    }

    /// A task with arbitrary extra `key = value` lines
    /// (e.g. `priority = "high"`).
    pub fn task_with(
        mut self,
        id: &str,
        cmd: Option<&str>,
        after: &[&str],
        extra: &[&str],
    ) -> Self {
        let mut section = format!("[task.{id}]\n");
        if let Some(cmd) = cmd {
            section.push_str(&format!("cmd = {}\n", quote(cmd)));
        }
        if !after.is_empty() {
            section.push_str(&format!("after = {}\n", quote_list(after)));
        }
        for line in extra {
            section.push_str(line);
            section.push('\n');
        }
        self.tasks.push(section);
        self
    }

    pub fn feature(mut self, id: &str, status: &str, tasks: &[&str]) -> Self {
        self.features.push(format!(
            "[feature.{id}]\nstatus = {}\ntasks = {}\n",
            quote(status),
            quote_list(tasks)
        ));
        self
    }

    pub fn to_toml(&self) -> String {
        let mut out = String::new();
        if let Some(id) = &self.project_id {
            out.push_str(&format!("[project]\nid = {}\n\n", quote(id)));
        }
        if !self.settings.is_empty() {
            out.push_str("[settings]\n");
            for line in &self.settings {
                out.push_str(line);
                out.push('\n');
            }
            out.push('\n');
        }
        for section in self.tasks.iter().chain(&self.features) {
            out.push_str(section);
            out.push('\n');
        }
        out
    }

    /// Write `<dir>/<name>` and return its path.
    pub fn write_to(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, self.to_toml()).expect("writing project file");
        path
    }

    pub fn build(&self) -> ProjectConfig {
        parse_project(&self.to_toml()).expect("Failed to build valid project from builder")
    }
}

impl Default for ProjectFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}
