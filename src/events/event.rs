// src/events/event.rs

//! Immutable event records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier for an emitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event type used as the subscription key.
///
/// Lifecycle events published by the scheduler and the feature board have
/// dedicated variants; anything else travels as `Custom`. The wire form is
/// the dotted name returned by [`EventKind::as_str`].
///
/// Build custom kinds with [`EventKind::custom`] or `From<&str>`. Writing
/// `EventKind::Custom("task.completed".into())` by hand produces a kind that
/// prints the same but never matches `TaskCompleted` subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    ExecutionStarted,
    ExecutionPaused,
    ExecutionResumed,
    ExecutionStopped,
    ExecutionReset,
    ExecutionCompleted,
    ExecutionBlocked,
    ExecutionError,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskStatusChanged,
    FeatureStatusChanged,
    FeatureCompleted,
    Custom(String),
}

impl EventKind {
    /// Kind for `name`, resolving built-in dotted names to their variant.
    pub fn custom(name: impl Into<String>) -> Self {
        EventKind::from(name.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::ExecutionStarted => "execution.started",
            EventKind::ExecutionPaused => "execution.paused",
            EventKind::ExecutionResumed => "execution.resumed",
            EventKind::ExecutionStopped => "execution.stopped",
            EventKind::ExecutionReset => "execution.reset",
            EventKind::ExecutionCompleted => "execution.completed",
            EventKind::ExecutionBlocked => "execution.blocked",
            EventKind::ExecutionError => "execution.error",
            EventKind::TaskStarted => "task.started",
            EventKind::TaskCompleted => "task.completed",
            EventKind::TaskFailed => "task.failed",
            EventKind::TaskStatusChanged => "task.status_changed",
            EventKind::FeatureStatusChanged => "feature.status_changed",
            EventKind::FeatureCompleted => "feature.completed",
            EventKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        match s {
            "execution.started" => EventKind::ExecutionStarted,
            "execution.paused" => EventKind::ExecutionPaused,
            "execution.resumed" => EventKind::ExecutionResumed,
            "execution.stopped" => EventKind::ExecutionStopped,
            "execution.reset" => EventKind::ExecutionReset,
            "execution.completed" => EventKind::ExecutionCompleted,
            "execution.blocked" => EventKind::ExecutionBlocked,
            "execution.error" => EventKind::ExecutionError,
            "task.started" => EventKind::TaskStarted,
            "task.completed" => EventKind::TaskCompleted,
            "task.failed" => EventKind::TaskFailed,
            "task.status_changed" => EventKind::TaskStatusChanged,
            "feature.status_changed" => EventKind::FeatureStatusChanged,
            "feature.completed" => EventKind::FeatureCompleted,
            other => EventKind::Custom(other.to_string()),
        }
    }
}

impl From<String> for EventKind {
    fn from(s: String) -> Self {
        EventKind::from(s.as_str())
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Custom(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

/// A single emitted event. Never mutated after creation; handlers and the
/// history share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Event {
    pub(crate) fn new(
        kind: EventKind,
        payload: Value,
        source: String,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            id: EventId::new(),
            kind,
            timestamp: Utc::now(),
            payload,
            source,
            correlation_id,
        }
    }
}

/// Per-emission options.
#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    /// Overrides the bus-wide default source.
    pub source: Option<String>,
    pub correlation_id: Option<String>,
}

impl EmitOptions {
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}
