//! The persistence collaborator seam.
//!
//! The durable store behind task rows is an opaque relational database owned
//! by the embedding application. The core only requires the narrow
//! [`TaskStore`] contract — insert with generated id, equality-predicate
//! lookup, and bulk update — and assumes nothing stronger than per-call
//! atomicity.
//!
//! [`MemoryTaskStore`] is the in-process reference implementation used by
//! tests and embedders without a database; a production SQL store implements
//! the same trait outside this crate.

mod memory;
mod task;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryTaskStore;
pub use task::{NewTask, TaskExtra, TaskFilter, TaskId, TaskPatch, TaskRecord, TaskStatus};

/// # Persistence failure.
///
/// Opaque to the core: callers either surface it (task lifecycle writes) or
/// log it and carry on (stats attribution, exit reconciliation).
#[derive(Error, Debug)]
#[error("storage backend failure: {0}")]
pub struct StoreError(String);

impl StoreError {
    /// Wraps a backend error message.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self(err.to_string())
    }
}

/// Contract the core requires from the task-row store.
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    /// Inserts a row and returns it with the store-assigned id.
    async fn insert(&self, new: NewTask) -> Result<TaskRecord, StoreError>;

    /// Returns the first row matching `filter`, if any.
    async fn find_one(&self, filter: TaskFilter) -> Result<Option<TaskRecord>, StoreError>;

    /// Returns every row matching `filter`.
    async fn find_all(&self, filter: TaskFilter) -> Result<Vec<TaskRecord>, StoreError>;

    /// Applies `patch` to every row matching `filter`; returns the affected
    /// count.
    async fn update_where(&self, filter: TaskFilter, patch: TaskPatch) -> Result<u64, StoreError>;
}
