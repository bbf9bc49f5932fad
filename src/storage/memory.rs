// src/storage/memory.rs

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::dag::Task;
use crate::errors::{OrchestratorError, Result};

use super::{Entity, Repository};

/// Process-local repository backed by a vector.
///
/// Clones share the same underlying store.
#[derive(Debug)]
pub struct InMemoryRepository<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for InMemoryRepository<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Entity> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> MutexGuard<'_, Vec<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn not_found<T: Entity>(id: &str) -> OrchestratorError {
    match T::KIND {
        "task" => OrchestratorError::TaskNotFound(id.to_string()),
        "feature" => OrchestratorError::FeatureNotFound(id.to_string()),
        kind => OrchestratorError::Other(anyhow::anyhow!("{kind} not found: {id}")),
    }
}

impl<T: Entity> Repository<T> for InMemoryRepository<T> {
    fn create(&self, item: T) -> Result<T> {
        let mut items = self.items();
        if items.iter().any(|existing| existing.id() == item.id()) {
            return Err(OrchestratorError::EntityExists(format!(
                "{} '{}'",
                T::KIND,
                item.id()
            )));
        }
        items.push(item.clone());
        Ok(item)
    }

    fn get(&self, id: &str) -> Option<T> {
        self.items().iter().find(|item| item.id() == id).cloned()
    }

    fn update(&self, item: T) -> Result<T> {
        let mut items = self.items();
        match items.iter_mut().find(|existing| existing.id() == item.id()) {
            Some(slot) => {
                *slot = item.clone();
                Ok(item)
            }
            None => Err(not_found::<T>(item.id())),
        }
    }

    fn delete(&self, id: &str) -> Result<T> {
        let mut items = self.items();
        match items.iter().position(|item| item.id() == id) {
            Some(pos) => Ok(items.remove(pos)),
            None => Err(not_found::<T>(id)),
        }
    }

    fn list(&self) -> Vec<T> {
        self.items().clone()
    }

    fn len(&self) -> usize {
        self.items().len()
    }
}

impl Entity for Task {
    const KIND: &'static str = "task";

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskStatus;

    #[test]
    fn crud_round_trip_keeps_insertion_order() {
        let repo = InMemoryRepository::new();
        repo.create(Task::new("b", "B")).unwrap();
        repo.create(Task::new("a", "A")).unwrap();

        let mut updated = repo.get("b").unwrap();
        updated.status = TaskStatus::Completed;
        repo.update(updated).unwrap();

        let ids: Vec<String> = repo.list().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(repo.get("b").unwrap().status, TaskStatus::Completed);

        let removed = repo.delete("a").unwrap();
        assert_eq!(removed.id, "a");
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let repo = InMemoryRepository::new();
        repo.create(Task::new("a", "A")).unwrap();
        assert!(matches!(
            repo.create(Task::new("a", "again")),
            Err(OrchestratorError::EntityExists(_))
        ));
    }

    #[test]
    fn missing_entities_map_to_typed_errors() {
        let repo: InMemoryRepository<Task> = InMemoryRepository::new();
        assert!(matches!(
            repo.update(Task::new("ghost", "G")),
            Err(OrchestratorError::TaskNotFound(id)) if id == "ghost"
        ));
        assert!(matches!(
            repo.delete("ghost"),
            Err(OrchestratorError::TaskNotFound(_))
        ));
    }

    #[test]
    fn clones_share_state() {
        let repo = InMemoryRepository::new();
        let other = repo.clone();
        repo.create(Task::new("a", "A")).unwrap();
        assert!(other.get("a").is_some());
    }
}
