// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ProjectConfig, RawProjectFile};
use crate::errors::Result;

/// Load a project file from a given path and return the raw
/// `RawProjectFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawProjectFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let raw: RawProjectFile = toml::from_str(&contents)?;
    Ok(raw)
}

/// Load a project file from path and validate it.
///
/// This is the recommended entry point for the rest of the application.
/// When `[project].id` is absent the file stem becomes the project id.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ProjectConfig> {
    let path = path.as_ref();
    let mut raw = load_from_path(path)?;

    if raw.project.id.is_none() {
        raw.project.id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string);
    }

    let config = ProjectConfig::try_from(raw)?;
    debug!(
        path = %path.display(),
        project = %config.project_id(),
        tasks = config.tasks().len(),
        features = config.features().len(),
        "project file loaded"
    );
    Ok(config)
}

/// Parse and validate project TOML held in memory.
pub fn parse_project(contents: &str) -> Result<ProjectConfig> {
    let raw: RawProjectFile = toml::from_str(contents)?;
    ProjectConfig::try_from(raw)
}

/// `agentflow.toml` in the current working directory.
pub fn default_project_path() -> PathBuf {
    PathBuf::from("agentflow.toml")
}
