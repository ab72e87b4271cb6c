//! # Observability snapshot.
//!
//! [`StatusReport`] is the serialized answer to a "what is running right
//! now" query: the headless flag plus every `running` task row with its
//! attributed limiter stats. The HTTP layer serves it as-is; the operator
//! console renders it with [`format_duration`] for uptimes.

use std::time::Duration;

use serde::Serialize;

use crate::store::{StoreError, TaskFilter, TaskRecord, TaskStatus, TaskStore};

/// Point-in-time view of the system for operators.
#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
    /// Whether the process runs without the interactive console.
    pub headless: bool,
    /// Every task currently recorded as running.
    pub tasks: Vec<TaskRecord>,
}

impl StatusReport {
    /// Builds a report from the store's `running` rows.
    pub async fn collect(headless: bool, store: &dyn TaskStore) -> Result<Self, StoreError> {
        let tasks = store
            .find_all(TaskFilter::by_status(TaskStatus::Running))
            .await?;
        Ok(Self { headless, tasks })
    }
}

/// Formats a duration for operator output: seconds below a minute, then
/// minutes and seconds, then hours and minutes.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{secs:.1} seconds")
    } else if secs < 3600.0 {
        let minutes = (secs / 60.0).floor() as u64;
        format!("{minutes} m {:.1} s", secs % 60.0)
    } else {
        let hours = (secs / 3600.0).floor() as u64;
        let minutes = ((secs % 3600.0) / 60.0).floor() as u64;
        format!("{hours} h {minutes} m")
    }
}
