//! # Task rows: the durable record of one supervised worker process.
//!
//! A task row is created when a fetch job starts, mutated by exit
//! reconciliation, explicit termination, crash recovery, and limiter-stats
//! attribution. Rows are never deleted by this subsystem.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::limiter::LimiterStats;

/// Store-assigned task identifier.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// The worker process is (believed to be) alive.
    Running,
    /// The worker exited with code 0.
    Completed,
    /// The worker exited with a non-zero code, or was orphaned by a
    /// supervisor crash.
    Failed,
    /// The worker was stopped by a termination signal.
    Terminated,
}

impl TaskStatus {
    /// Returns the stable lowercase name used in rows and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Terminated => "terminated",
        }
    }
}

/// Free-form task metadata carried in the row.
///
/// Currently holds per-limiter stats snapshots attributed to this task,
/// keyed by limiter name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExtra {
    /// Latest counter snapshot of each limiter this task's calls went through.
    #[serde(default)]
    pub limiter_stats: BTreeMap<String, LimiterStats>,
}

/// One durable task row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Store-assigned id.
    pub id: TaskId,
    /// Lifecycle state.
    pub status: TaskStatus,
    /// OS process id of the worker; only trustworthy within the supervisor
    /// process generation that spawned it.
    pub pid: u32,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Free-form metadata (limiter stats attribution).
    #[serde(default)]
    pub extra_info: TaskExtra,
}

/// A row to insert; the store assigns the id.
#[derive(Clone, Debug)]
pub struct NewTask {
    pub status: TaskStatus,
    pub pid: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewTask {
    /// A freshly spawned worker: `running`, timestamps set to now.
    pub fn running(pid: u32) -> Self {
        let now = Utc::now();
        Self {
            status: TaskStatus::Running,
            pid,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Equality predicate over task rows.
///
/// Unset fields match anything; set fields must all match.
#[derive(Clone, Copy, Debug, Default)]
pub struct TaskFilter {
    pub id: Option<TaskId>,
    pub status: Option<TaskStatus>,
}

impl TaskFilter {
    /// Matches every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches the row with the given id.
    pub fn by_id(id: TaskId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    /// Matches every row with the given status.
    pub fn by_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Evaluates the predicate against one row.
    pub fn matches(&self, row: &TaskRecord) -> bool {
        self.id.map_or(true, |id| row.id == id)
            && self.status.map_or(true, |status| row.status == status)
    }
}

/// A partial update applied to every row a filter matches.
///
/// `updated_at` is always refreshed; limiter stats merge by limiter name
/// rather than replacing the whole map.
#[derive(Clone, Debug)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub updated_at: DateTime<Utc>,
    pub limiter_stats: Option<(String, LimiterStats)>,
}

impl TaskPatch {
    /// An empty patch that only refreshes `updated_at`.
    pub fn touch() -> Self {
        Self {
            status: None,
            updated_at: Utc::now(),
            limiter_stats: None,
        }
    }

    /// Sets the row status.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Merges one limiter's snapshot into `extra_info.limiter_stats`.
    pub fn with_limiter_stats(mut self, limiter: impl Into<String>, stats: LimiterStats) -> Self {
        self.limiter_stats = Some((limiter.into(), stats));
        self
    }

    /// Applies the patch to a row in place.
    pub fn apply(&self, row: &mut TaskRecord) {
        if let Some(status) = self.status {
            row.status = status;
        }
        if let Some((limiter, stats)) = &self.limiter_stats {
            row.extra_info
                .limiter_stats
                .insert(limiter.clone(), *stats);
        }
        row.updated_at = self.updated_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, status: TaskStatus) -> TaskRecord {
        let now = Utc::now();
        TaskRecord {
            id: TaskId(id),
            status,
            pid: 4242,
            created_at: now,
            updated_at: now,
            extra_info: TaskExtra::default(),
        }
    }

    #[test]
    fn filter_combines_id_and_status() {
        let running = row(1, TaskStatus::Running);
        assert!(TaskFilter::all().matches(&running));
        assert!(TaskFilter::by_id(TaskId(1)).matches(&running));
        assert!(!TaskFilter::by_id(TaskId(2)).matches(&running));
        assert!(TaskFilter::by_status(TaskStatus::Running).matches(&running));
        assert!(!TaskFilter::by_status(TaskStatus::Failed).matches(&running));
    }

    #[test]
    fn patch_merges_limiter_stats_by_name() {
        let mut r = row(7, TaskStatus::Running);
        let eth = LimiterStats {
            completed: 3,
            ..LimiterStats::default()
        };
        TaskPatch::touch().with_limiter_stats("eth", eth).apply(&mut r);

        let arb = LimiterStats {
            completed: 1,
            ..LimiterStats::default()
        };
        TaskPatch::touch().with_limiter_stats("arb", arb).apply(&mut r);

        assert_eq!(r.extra_info.limiter_stats.len(), 2);
        assert_eq!(r.extra_info.limiter_stats["eth"].completed, 3);
        assert_eq!(r.status, TaskStatus::Running);
    }

    #[test]
    fn row_serializes_with_observability_field_names() {
        let mut r = row(5, TaskStatus::Running);
        TaskPatch::touch()
            .with_limiter_stats("eth", LimiterStats::default())
            .apply(&mut r);

        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["id"], 5);
        assert_eq!(json["status"], "running");
        assert!(json["extra_info"]["limiterStats"]["eth"].is_object());
    }
}
