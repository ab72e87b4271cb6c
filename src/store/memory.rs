//! # In-memory task store.
//!
//! Reference [`TaskStore`] implementation backed by a mutex-guarded vector:
//! sequential ids, equality-predicate matching, merge-on-patch. Used by tests
//! and by embedders that run without a database.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::task::{NewTask, TaskExtra, TaskFilter, TaskId, TaskPatch, TaskRecord};
use super::{StoreError, TaskStore};

struct MemoryInner {
    rows: Vec<TaskRecord>,
    next_id: i64,
}

/// Mutex-guarded in-memory store with sequential ids.
pub struct MemoryTaskStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryTaskStore {
    /// Creates an empty store; the first insert gets id 1.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                rows: Vec::new(),
                next_id: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, new: NewTask) -> Result<TaskRecord, StoreError> {
        let mut inner = self.lock();
        let id = TaskId(inner.next_id);
        inner.next_id += 1;
        let row = TaskRecord {
            id,
            status: new.status,
            pid: new.pid,
            created_at: new.created_at,
            updated_at: new.updated_at,
            extra_info: TaskExtra::default(),
        };
        inner.rows.push(row.clone());
        Ok(row)
    }

    async fn find_one(&self, filter: TaskFilter) -> Result<Option<TaskRecord>, StoreError> {
        let inner = self.lock();
        Ok(inner.rows.iter().find(|r| filter.matches(r)).cloned())
    }

    async fn find_all(&self, filter: TaskFilter) -> Result<Vec<TaskRecord>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .rows
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn update_where(&self, filter: TaskFilter, patch: TaskPatch) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        let mut affected = 0;
        for row in inner.rows.iter_mut().filter(|r| filter.matches(r)) {
            patch.apply(row);
            affected += 1;
        }
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TaskStatus;

    #[tokio::test]
    async fn insert_assigns_sequential_ids() {
        let store = MemoryTaskStore::new();
        let a = store.insert(NewTask::running(100)).await.unwrap();
        let b = store.insert(NewTask::running(101)).await.unwrap();
        assert_eq!(a.id, TaskId(1));
        assert_eq!(b.id, TaskId(2));
        assert_eq!(a.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn update_where_reports_affected_count() {
        let store = MemoryTaskStore::new();
        for pid in 0..3 {
            store.insert(NewTask::running(pid)).await.unwrap();
        }

        let n = store
            .update_where(
                TaskFilter::by_status(TaskStatus::Running),
                TaskPatch::touch().with_status(TaskStatus::Failed),
            )
            .await
            .unwrap();
        assert_eq!(n, 3);

        let failed = store
            .find_all(TaskFilter::by_status(TaskStatus::Failed))
            .await
            .unwrap();
        assert_eq!(failed.len(), 3);
        assert!(store
            .find_one(TaskFilter::by_status(TaskStatus::Running))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn update_refreshes_updated_at() {
        let store = MemoryTaskStore::new();
        let row = store.insert(NewTask::running(7)).await.unwrap();

        let patch = TaskPatch::touch().with_status(TaskStatus::Terminated);
        let later = patch.updated_at;
        store
            .update_where(TaskFilter::by_id(row.id), patch)
            .await
            .unwrap();

        let row = store
            .find_one(TaskFilter::by_id(row.id))
            .await
            .unwrap()
            .expect("row exists");
        assert_eq!(row.status, TaskStatus::Terminated);
        assert_eq!(row.updated_at, later);
    }
}
