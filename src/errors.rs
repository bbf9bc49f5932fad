// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

use crate::types::{FeatureStatus, RunStatus};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Fatal: the task graph cannot be ordered. `tasks` names every task the
    /// topological peel never reached; `cycles` lists the strongly connected
    /// components responsible.
    #[error("cyclic dependency between tasks: {}", .tasks.join(", "))]
    CyclicDependency {
        tasks: Vec<String>,
        cycles: Vec<Vec<String>>,
    },

    /// Fatal: two tasks in one start share an id.
    #[error("duplicate task id: {0}")]
    DuplicateTask(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    #[error("cannot move feature '{feature}' to {target}: WIP limit of {limit} reached")]
    WipLimitReached {
        feature: String,
        target: FeatureStatus,
        limit: usize,
    },

    #[error("cannot {action} while run is {from}")]
    InvalidTransition { from: RunStatus, action: &'static str },

    #[error("entity already exists: {0}")]
    EntityExists(String),

    #[error("runtime is no longer accepting commands")]
    RuntimeClosed,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
