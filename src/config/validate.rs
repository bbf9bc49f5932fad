// src/config/validate.rs

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::board::Feature;
use crate::config::model::{ProjectConfig, RawFeature, RawProjectFile, RawTask};
use crate::dag::{Task, TaskId};
use crate::errors::{OrchestratorError, Result};
use crate::types::FeatureStatus;

/// Used when neither `[project].id` nor a file name is available.
pub const FALLBACK_PROJECT_ID: &str = "agentflow";

impl TryFrom<RawProjectFile> for ProjectConfig {
    type Error = OrchestratorError;

    fn try_from(raw: RawProjectFile) -> std::result::Result<Self, Self::Error> {
        validate_settings(&raw)?;

        let mut tasks = Vec::with_capacity(raw.task.len());
        let mut commands = HashMap::new();
        for (id, value) in raw.task {
            let section: RawTask = value.try_into()?;
            if let Some(cmd) = &section.cmd {
                commands.insert(id.clone(), cmd.clone());
            }
            tasks.push(task_from_section(id, section)?);
        }
        ensure_has_tasks(&tasks)?;
        warn_dangling_dependencies(&tasks);

        let mut features = Vec::with_capacity(raw.feature.len());
        for (id, value) in raw.feature {
            let section: RawFeature = value.try_into()?;
            features.push(feature_from_section(id, section, &tasks)?);
        }
        validate_active_features(&features, raw.settings.wip_limit)?;

        let project_id = raw
            .project
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_PROJECT_ID.to_string());

        Ok(ProjectConfig::new_unchecked(
            project_id,
            raw.settings,
            tasks,
            commands,
            features,
        ))
    }
}

fn config_error(message: impl Into<String>) -> OrchestratorError {
    OrchestratorError::ConfigError(message.into())
}

fn validate_settings(cfg: &RawProjectFile) -> Result<()> {
    if cfg.settings.wip_limit == 0 {
        return Err(config_error("[settings].wip_limit must be >= 1 (got 0)"));
    }
    if cfg.settings.history_capacity == 0 {
        return Err(config_error("[settings].history_capacity must be >= 1 (got 0)"));
    }
    if cfg.settings.event_source.trim().is_empty() {
        return Err(config_error("[settings].event_source must not be empty"));
    }
    Ok(())
}

fn ensure_has_tasks(tasks: &[Task]) -> Result<()> {
    if tasks.is_empty() {
        return Err(config_error(
            "project must contain at least one [task.<id>] section",
        ));
    }
    Ok(())
}

fn task_from_section(id: TaskId, section: RawTask) -> Result<Task> {
    if section.progress > 100 {
        return Err(config_error(format!(
            "task '{id}' has progress {} (must be 0..=100)",
            section.progress
        )));
    }

    let mut task = Task::new(id.clone(), section.title.unwrap_or(id))
        .with_priority(section.priority)
        .with_complexity(section.complexity)
        .with_status(section.status);
    task.progress = section.progress;
    task.dependencies = section.after;
    Ok(task)
}

/// Dangling `after` entries are allowed; the resolver skips them.
fn warn_dangling_dependencies(tasks: &[Task]) {
    let known: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    for task in tasks {
        for dep in task.dependencies.iter().filter(|d| !known.contains(d.as_str())) {
            warn!(task = %task.id, dep = %dep, "dependency on undeclared task will be ignored");
        }
    }
}

fn feature_from_section(id: String, section: RawFeature, tasks: &[Task]) -> Result<Feature> {
    for task_id in &section.tasks {
        if !tasks.iter().any(|t| &t.id == task_id) {
            return Err(config_error(format!(
                "feature '{id}' references unknown task '{task_id}'"
            )));
        }
    }

    let title = section.title.unwrap_or_else(|| id.clone());
    Ok(Feature::new(id, title)
        .with_status(section.status)
        .with_priority(section.priority)
        .with_complexity(section.complexity)
        .with_tasks(section.tasks))
}

fn validate_active_features(features: &[Feature], wip_limit: usize) -> Result<()> {
    let active = features
        .iter()
        .filter(|f| f.status == FeatureStatus::InProgress)
        .count();
    if active > wip_limit {
        return Err(config_error(format!(
            "{active} features are in_progress but [settings].wip_limit is {wip_limit}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Priority, TaskStatus};

    fn parse(src: &str) -> Result<ProjectConfig> {
        let raw: RawProjectFile = toml::from_str(src)?;
        ProjectConfig::try_from(raw)
    }

    #[test]
    fn tasks_keep_declaration_order() {
        let cfg = parse(
            r#"
            [task.zeta]
            cmd = "true"

            [task.alpha]
            priority = "critical"
            after = ["zeta"]
            "#,
        )
        .unwrap();

        let ids: Vec<_> = cfg.tasks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["zeta", "alpha"]);
        assert_eq!(cfg.tasks()[1].priority, Priority::Critical);
        assert_eq!(cfg.tasks()[1].dependencies, vec!["zeta"]);
        assert_eq!(cfg.tasks()[0].title, "zeta");
        assert_eq!(cfg.commands().get("zeta").map(String::as_str), Some("true"));
        assert!(!cfg.commands().contains_key("alpha"));
        assert_eq!(cfg.project_id(), FALLBACK_PROJECT_ID);
    }

    #[test]
    fn dangling_dependency_is_kept() {
        let cfg = parse(
            r#"
            [task.a]
            after = ["nowhere"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.tasks()[0].dependencies, vec!["nowhere"]);
    }

    #[test]
    fn empty_project_is_rejected() {
        let err = parse("[project]\nid = \"x\"\n").unwrap_err();
        assert!(matches!(err, OrchestratorError::ConfigError(_)));
    }

    #[test]
    fn progress_above_hundred_is_rejected() {
        let err = parse("[task.a]\nprogress = 120\n").unwrap_err();
        assert!(err.to_string().contains("progress 120"));
    }

    #[test]
    fn zero_wip_limit_is_rejected() {
        let err = parse("[settings]\nwip_limit = 0\n[task.a]\n").unwrap_err();
        assert!(err.to_string().contains("wip_limit"));
    }

    #[test]
    fn feature_must_reference_declared_tasks() {
        let err = parse(
            r#"
            [task.a]
            [feature.f]
            tasks = ["a", "b"]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown task 'b'"));
    }

    #[test]
    fn statuses_accept_both_spellings() {
        let cfg = parse(
            r#"
            [task.a]
            status = "in_progress"
            [task.b]
            status = "completed"
            progress = 100
            [feature.f]
            status = "ai_review"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.tasks()[0].status, TaskStatus::InProgress);
        assert_eq!(cfg.tasks()[1].progress, 100);
        assert_eq!(cfg.features()[0].status, FeatureStatus::AiReview);
    }

    #[test]
    fn too_many_active_features_are_rejected() {
        let err = parse(
            r#"
            [settings]
            wip_limit = 1
            [task.a]
            [feature.f1]
            status = "in_progress"
            [feature.f2]
            status = "in_progress"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("wip_limit is 1"));
    }
}
