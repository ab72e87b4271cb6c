//! # Crash recovery: reconcile task rows after a supervisor restart.
//!
//! After a supervisor crash, rows left at `running` refer to pids from a
//! prior process generation that can no longer be trusted — the process may
//! be gone, or the pid may have been reused. The scanner runs once at
//! startup, before any external traffic, and bulk-marks every such row as
//! `failed`.
//!
//! This is the only durability mechanism for task state; in-memory limiter
//! stats are not recovered.

use std::sync::Arc;

use crate::store::{StoreError, TaskFilter, TaskPatch, TaskStatus, TaskStore};

/// Startup-time reconciliation of orphaned `running` rows.
pub struct CrashRecoveryScanner {
    store: Arc<dyn TaskStore>,
}

impl CrashRecoveryScanner {
    /// Creates a scanner over the given store.
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// Marks every `running` row as `failed`; returns the affected count.
    ///
    /// Run once, before accepting traffic.
    pub async fn run(&self) -> Result<u64, StoreError> {
        let orphaned = self
            .store
            .update_where(
                TaskFilter::by_status(TaskStatus::Running),
                TaskPatch::touch().with_status(TaskStatus::Failed),
            )
            .await?;
        if orphaned > 0 {
            tracing::warn!(orphaned, "marked orphaned running tasks as failed");
        } else {
            tracing::debug!("no orphaned tasks found");
        }
        Ok(orphaned)
    }
}
