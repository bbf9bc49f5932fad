// src/board/feature.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::TaskId;
use crate::storage::Entity;
use crate::types::{Complexity, FeatureStatus, Priority};

/// A unit of product work that owns an ordered list of tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub status: FeatureStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub complexity: Complexity,
    #[serde(default)]
    pub tasks: Vec<TaskId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Feature {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            status: FeatureStatus::default(),
            priority: Priority::default(),
            complexity: Complexity::default(),
            tasks: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: FeatureStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_tasks<I, S>(mut self, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.tasks = tasks.into_iter().map(Into::into).collect();
        self
    }
}

impl Entity for Feature {
    const KIND: &'static str = "feature";

    fn id(&self) -> &str {
        &self.id
    }
}
