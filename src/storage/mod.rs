// src/storage/mod.rs

//! Pluggable storage for domain records.
//!
//! The scheduler and the feature board never reach into a concrete map;
//! they go through [`Repository`], which a host can back with anything.
//! [`memory::InMemoryRepository`] is the provided implementation.

use std::fmt::Debug;

use crate::errors::Result;

pub mod memory;

pub use memory::InMemoryRepository;

/// A record that can be stored in a [`Repository`].
pub trait Entity: Clone + Send + Sync + Debug + 'static {
    /// Human-readable kind used in error messages (e.g. `"feature"`).
    const KIND: &'static str;

    fn id(&self) -> &str;
}

/// Create/read/update/delete contract for a store of entities.
pub trait Repository<T: Entity>: Send + Sync + Debug {
    /// Insert a new entity. Fails with `EntityExists` if the id is taken.
    fn create(&self, item: T) -> Result<T>;

    fn get(&self, id: &str) -> Option<T>;

    /// Replace an existing entity. Fails with a not-found error if absent.
    fn update(&self, item: T) -> Result<T>;

    /// Remove and return an entity.
    fn delete(&self, id: &str) -> Result<T>;

    /// All entities in insertion order.
    fn list(&self) -> Vec<T>;

    fn len(&self) -> usize {
        self.list().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
