// src/config/mod.rs

//! Project file loading and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a project file from disk (`loader.rs`).
//! - Convert the raw model into a validated `ProjectConfig` (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_project_path, load_and_validate, load_from_path, parse_project};
pub use model::{
    ProjectConfig, ProjectSection, RawFeature, RawProjectFile, RawTask, SettingsSection,
};
pub use validate::FALLBACK_PROJECT_ID;
