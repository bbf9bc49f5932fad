// src/board/mod.rs

//! Feature board with a work-in-progress limit.
//!
//! The board gates entry into `in_progress`: at most `wip_limit` features may
//! hold that status at once. The check and the write happen under one
//! lock; events are published after it is released.

use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info};

use crate::errors::{OrchestratorError, Result};
use crate::events::{EmitOptions, EventBus, EventKind};
use crate::storage::{InMemoryRepository, Repository};
use crate::types::FeatureStatus;

pub mod feature;

pub use feature::Feature;

pub const DEFAULT_WIP_LIMIT: usize = 3;

#[derive(Debug)]
pub struct FeatureBoard<R = InMemoryRepository<Feature>>
where
    R: Repository<Feature>,
{
    repo: R,
    bus: EventBus,
    wip_limit: usize,
    admission: Mutex<()>,
}

impl<R: Repository<Feature>> FeatureBoard<R> {
    pub fn new(repo: R, bus: EventBus) -> Self {
        Self {
            repo,
            bus,
            wip_limit: DEFAULT_WIP_LIMIT,
            admission: Mutex::new(()),
        }
    }

    /// Limits below 1 are raised to 1.
    pub fn with_wip_limit(mut self, limit: usize) -> Self {
        self.wip_limit = limit.max(1);
        self
    }

    pub fn wip_limit(&self) -> usize {
        self.wip_limit
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Register a feature. A feature created directly in `in_progress`
    /// counts against the limit like a move would.
    pub fn add_feature(&self, feature: Feature) -> Result<Feature> {
        let _guard = self.admission.lock().unwrap_or_else(PoisonError::into_inner);
        if feature.status == FeatureStatus::InProgress {
            self.admit(&feature.id, FeatureStatus::InProgress)?;
        }
        debug!(feature = %feature.id, status = %feature.status, "feature added");
        self.repo.create(feature)
    }

    pub fn feature(&self, id: &str) -> Option<Feature> {
        self.repo.get(id)
    }

    pub fn features(&self) -> Vec<Feature> {
        self.repo.list()
    }

    pub fn features_with_status(&self, status: FeatureStatus) -> Vec<Feature> {
        self.repo
            .list()
            .into_iter()
            .filter(|f| f.status == status)
            .collect()
    }

    /// Number of features currently holding `in_progress`.
    pub fn active_count(&self) -> usize {
        self.repo
            .list()
            .iter()
            .filter(|f| f.status == FeatureStatus::InProgress)
            .count()
    }

    pub fn remove_feature(&self, id: &str) -> Result<Feature> {
        let _guard = self.admission.lock().unwrap_or_else(PoisonError::into_inner);
        self.repo.delete(id)
    }

    /// Move a feature to `status`.
    ///
    /// Entering `in_progress` from any other status is rejected with
    /// `WipLimitReached` when the limit is already reached; nothing changes
    /// and nothing is emitted in that case. On success a
    /// `feature.status_changed` event is published, plus `feature.completed`
    /// when the new status is `done`.
    pub async fn move_feature(&self, id: &str, status: FeatureStatus) -> Result<Feature> {
        let (feature, previous) = {
            let _guard = self.admission.lock().unwrap_or_else(PoisonError::into_inner);

            let mut feature = self
                .repo
                .get(id)
                .ok_or_else(|| OrchestratorError::FeatureNotFound(id.to_string()))?;
            let previous = feature.status;

            if status == FeatureStatus::InProgress && previous != FeatureStatus::InProgress {
                self.admit(id, status)?;
            }

            feature.status = status;
            feature.updated_at = Utc::now();
            (self.repo.update(feature)?, previous)
        };

        info!(feature = %feature.id, from = %previous, to = %status, "feature moved");

        let options = EmitOptions::default().with_correlation_id(feature.id.clone());
        self.bus
            .emit(
                EventKind::FeatureStatusChanged,
                json!({
                    "featureId": feature.id,
                    "from": previous,
                    "to": status,
                }),
                options.clone(),
            )
            .await;

        if status == FeatureStatus::Done {
            self.bus
                .emit(
                    EventKind::FeatureCompleted,
                    json!({ "featureId": feature.id, "title": feature.title }),
                    options,
                )
                .await;
        }

        Ok(feature)
    }

    /// Caller holds the admission lock.
    fn admit(&self, id: &str, target: FeatureStatus) -> Result<()> {
        let active = self.active_count();
        if active >= self.wip_limit {
            info!(feature = %id, active, limit = self.wip_limit, "WIP limit reached; rejecting move");
            return Err(OrchestratorError::WipLimitReached {
                feature: id.to_string(),
                target,
                limit: self.wip_limit,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn board_with(features: &[(&str, FeatureStatus)]) -> (FeatureBoard, EventBus) {
        let bus = EventBus::default();
        let board = FeatureBoard::new(InMemoryRepository::new(), bus.clone());
        for (id, status) in features {
            board
                .add_feature(Feature::new(*id, format!("Feature {id}")).with_status(*status))
                .unwrap();
        }
        (board, bus)
    }

    #[tokio::test]
    async fn fourth_active_feature_is_rejected_without_side_effects() {
        let (board, bus) = board_with(&[
            ("a", FeatureStatus::InProgress),
            ("b", FeatureStatus::InProgress),
            ("c", FeatureStatus::InProgress),
            ("d", FeatureStatus::Planning),
        ]);
        let before = board.feature("d").unwrap();

        let err = board
            .move_feature("d", FeatureStatus::InProgress)
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::WipLimitReached { limit: 3, .. }));
        assert_eq!(board.feature("d").unwrap(), before);
        assert_eq!(board.active_count(), 3);
        assert_eq!(bus.history_len(), 0);
    }

    #[tokio::test]
    async fn moves_that_do_not_add_an_active_feature_pass_at_the_limit() {
        let (board, _bus) = board_with(&[
            ("a", FeatureStatus::InProgress),
            ("b", FeatureStatus::InProgress),
            ("c", FeatureStatus::InProgress),
            ("d", FeatureStatus::Backlog),
        ]);

        board.move_feature("a", FeatureStatus::InProgress).await.unwrap();
        board.move_feature("d", FeatureStatus::Planning).await.unwrap();
        board.move_feature("a", FeatureStatus::AiReview).await.unwrap();
        board.move_feature("d", FeatureStatus::InProgress).await.unwrap();

        assert_eq!(board.active_count(), 3);
        assert_eq!(board.features_with_status(FeatureStatus::AiReview).len(), 1);
    }

    #[tokio::test]
    async fn moving_to_done_emits_status_change_and_completion() {
        let (board, bus) = board_with(&[("a", FeatureStatus::HumanReview)]);
        let moved = board.move_feature("a", FeatureStatus::Done).await.unwrap();
        assert_eq!(moved.status, FeatureStatus::Done);
        assert!(moved.updated_at >= moved.created_at);

        let kinds: Vec<_> = bus.history(10).iter().map(|e| e.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![EventKind::FeatureStatusChanged, EventKind::FeatureCompleted]
        );
        let changed = &bus.history(10)[0];
        assert_eq!(changed.payload["from"], "human_review");
        assert_eq!(changed.payload["to"], "done");
        assert_eq!(changed.correlation_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn unknown_feature_is_reported() {
        let (board, _bus) = board_with(&[]);
        let err = board
            .move_feature("ghost", FeatureStatus::Planning)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::FeatureNotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn adding_an_active_feature_respects_the_limit() {
        let (board, _bus) = board_with(&[]);
        let board = board.with_wip_limit(1);
        board
            .add_feature(Feature::new("a", "A").with_status(FeatureStatus::InProgress))
            .unwrap();
        let err = board
            .add_feature(Feature::new("b", "B").with_status(FeatureStatus::InProgress))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::WipLimitReached { limit: 1, .. }));
        assert!(board.feature("b").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_moves_never_exceed_the_limit() {
        let ids: Vec<String> = (0..10).map(|i| format!("f{i}")).collect();
        let bus = EventBus::default();
        let board = FeatureBoard::new(InMemoryRepository::new(), bus.clone());
        for id in &ids {
            board.add_feature(Feature::new(id.clone(), id.clone())).unwrap();
        }
        let board = Arc::new(board);

        let mut joins = Vec::new();
        for id in ids {
            let board = Arc::clone(&board);
            joins.push(tokio::spawn(async move {
                board.move_feature(&id, FeatureStatus::InProgress).await.is_ok()
            }));
        }

        let mut admitted = 0;
        for join in joins {
            if join.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, DEFAULT_WIP_LIMIT);
        assert_eq!(board.active_count(), DEFAULT_WIP_LIMIT);
        assert_eq!(bus.history_len(), DEFAULT_WIP_LIMIT);
    }
}
