// src/config/model.rs

use std::collections::HashMap;

use serde::Deserialize;

use crate::board::Feature;
use crate::dag::{Task, TaskId};
use crate::events::{DEFAULT_EVENT_SOURCE, DEFAULT_HISTORY_CAPACITY, EventBusConfig};
use crate::board::DEFAULT_WIP_LIMIT;
use crate::types::{Complexity, FeatureStatus, Priority, TaskStatus};

/// Project file as read from TOML, before validation.
///
/// ```toml
/// [project]
/// id = "demo"
///
/// [settings]
/// wip_limit = 3
///
/// [task.setup]
/// title = "Prepare workspace"
/// priority = "high"
/// cmd = "echo setup"
///
/// [task.build]
/// after = ["setup"]
/// cmd = "make"
///
/// [feature.login]
/// status = "planning"
/// tasks = ["setup", "build"]
/// ```
///
/// `[task.*]` and `[feature.*]` are kept as ordered tables so declaration
/// order survives into the task set; it breaks priority ties.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawProjectFile {
    #[serde(default)]
    pub project: ProjectSection,

    #[serde(default)]
    pub settings: SettingsSection,

    #[serde(default)]
    pub task: toml::Table,

    #[serde(default)]
    pub feature: toml::Table,
}

/// `[project]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectSection {
    /// Falls back to the file stem when loaded from disk.
    #[serde(default)]
    pub id: Option<String>,
}

/// `[settings]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SettingsSection {
    /// Maximum number of features in `in_progress`.
    #[serde(default = "default_wip_limit")]
    pub wip_limit: usize,

    /// Events kept in the bus history.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Default `source` stamped on emitted events.
    #[serde(default = "default_event_source")]
    pub event_source: String,
}

fn default_wip_limit() -> usize {
    DEFAULT_WIP_LIMIT
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_event_source() -> String {
    DEFAULT_EVENT_SOURCE.to_string()
}

impl Default for SettingsSection {
    fn default() -> Self {
        Self {
            wip_limit: default_wip_limit(),
            history_capacity: default_history_capacity(),
            event_source: default_event_source(),
        }
    }
}

/// `[task.<id>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTask {
    /// Defaults to the task id.
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub complexity: Complexity,

    /// Shell command run by the binary's executor.
    #[serde(default)]
    pub cmd: Option<String>,

    /// Dependencies: this task waits for every task listed here.
    #[serde(default)]
    pub after: Vec<TaskId>,

    /// Starting status, e.g. to resume a partially finished project.
    #[serde(default)]
    pub status: TaskStatus,

    #[serde(default)]
    pub progress: u8,
}

/// `[feature.<id>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFeature {
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub status: FeatureStatus,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub complexity: Complexity,

    #[serde(default)]
    pub tasks: Vec<TaskId>,
}

/// Validated project configuration.
///
/// Only obtainable through `TryFrom<RawProjectFile>`, so holding one means
/// every check in `validate.rs` passed.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    project_id: String,
    settings: SettingsSection,
    tasks: Vec<Task>,
    commands: HashMap<TaskId, String>,
    features: Vec<Feature>,
}

impl ProjectConfig {
    pub(crate) fn new_unchecked(
        project_id: String,
        settings: SettingsSection,
        tasks: Vec<Task>,
        commands: HashMap<TaskId, String>,
        features: Vec<Feature>,
    ) -> Self {
        Self {
            project_id,
            settings,
            tasks,
            commands,
            features,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn settings(&self) -> &SettingsSection {
        &self.settings
    }

    /// Tasks in declaration order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// `cmd` per task id, for tasks that declare one.
    pub fn commands(&self) -> &HashMap<TaskId, String> {
        &self.commands
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn bus_config(&self) -> EventBusConfig {
        EventBusConfig {
            history_capacity: self.settings.history_capacity,
            default_source: self.settings.event_source.clone(),
        }
    }
}
