//! # Per-limiter execution counters.
//!
//! Each limiter owns exactly one [`StatsBlock`]. The block is mutated only by
//! the limiter's transition hooks and is never reset within a process
//! lifetime; a restart starts from zero.
//!
//! ## Counter semantics
//! - `queued` / `running` are gauges: the current queue depth and the number
//!   of jobs executing right now.
//! - `completed` / `dropped` are cumulative. "Completed" means execution
//!   happened, independent of whether the wrapped call itself succeeded.
//! - `average_execution_time_ms` is the incremental running average over all
//!   completed executions: `avg' = (avg * (n - 1) + duration) / n`.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A job's observable state change at a limiter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// The job entered the wait queue.
    Queued,
    /// The job was dispatched and is now executing.
    Running,
    /// The job finished executing (successfully or not).
    Completed,
    /// The job was dropped before execution (overflow, displacement, timeout).
    Dropped,
}

impl Transition {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Transition::Queued => "queued",
            Transition::Running => "running",
            Transition::Completed => "completed",
            Transition::Dropped => "dropped",
        }
    }
}

/// Point-in-time snapshot of one limiter's counters.
///
/// Serializes with the field names the observability surface exposes
/// (`averageExecutionTimeMs` etc.).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimiterStats {
    /// Jobs currently waiting for admission.
    pub queued: u64,
    /// Jobs currently executing.
    pub running: u64,
    /// Executions finished since process start.
    pub completed: u64,
    /// Jobs dropped before execution since process start.
    pub dropped: u64,
    /// Duration of the most recent completed execution, in milliseconds.
    #[serde(default)]
    pub last_execution_time_ms: f64,
    /// Running average duration over all completed executions, in milliseconds.
    #[serde(default)]
    pub average_execution_time_ms: f64,
}

/// Mutable counters for one named limiter.
///
/// Thread-safe; every mutator returns the updated snapshot so the limiter can
/// hand it to observers without re-locking.
#[derive(Debug, Default)]
pub struct StatsBlock {
    inner: Mutex<LimiterStats>,
}

impl StatsBlock {
    /// Creates a zeroed block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current counters.
    pub fn snapshot(&self) -> LimiterStats {
        *self.lock()
    }

    /// A job entered the wait queue.
    pub(crate) fn on_queued(&self) -> LimiterStats {
        let mut s = self.lock();
        s.queued += 1;
        *s
    }

    /// A queued job was dispatched.
    pub(crate) fn on_dispatched(&self) -> LimiterStats {
        let mut s = self.lock();
        s.queued = s.queued.saturating_sub(1);
        s.running += 1;
        *s
    }

    /// A dispatched job finished executing.
    pub(crate) fn on_completed(&self, elapsed: Duration) -> LimiterStats {
        let mut s = self.lock();
        s.running = s.running.saturating_sub(1);
        s.completed += 1;
        let duration_ms = elapsed.as_secs_f64() * 1_000.0;
        let n = s.completed as f64;
        s.average_execution_time_ms =
            (s.average_execution_time_ms * (n - 1.0) + duration_ms) / n;
        s.last_execution_time_ms = duration_ms;
        *s
    }

    /// A queued job was dropped (displacement or admission timeout).
    pub(crate) fn on_dropped_from_queue(&self) -> LimiterStats {
        let mut s = self.lock();
        s.queued = s.queued.saturating_sub(1);
        s.dropped += 1;
        *s
    }

    /// A job was refused at admission without ever being queued.
    pub(crate) fn on_rejected(&self) -> LimiterStats {
        let mut s = self.lock();
        s.dropped += 1;
        *s
    }

    /// A dispatched job was abandoned before it ran (its caller vanished
    /// between the grant and the execution).
    pub(crate) fn on_abandoned(&self) -> LimiterStats {
        let mut s = self.lock();
        s.running = s.running.saturating_sub(1);
        s.dropped += 1;
        *s
    }

    fn lock(&self) -> MutexGuard<'_, LimiterStats> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_is_incremental() {
        let block = StatsBlock::new();
        block.on_queued();
        block.on_dispatched();
        block.on_completed(Duration::from_millis(100));
        block.on_queued();
        block.on_dispatched();
        let snap = block.on_completed(Duration::from_millis(300));

        assert_eq!(snap.completed, 2);
        assert_eq!(snap.average_execution_time_ms, 200.0);
        assert_eq!(snap.last_execution_time_ms, 300.0);
    }

    #[test]
    fn gauges_track_queue_and_running() {
        let block = StatsBlock::new();
        assert_eq!(block.on_queued().queued, 1);
        assert_eq!(block.on_queued().queued, 2);

        let snap = block.on_dispatched();
        assert_eq!(snap.queued, 1);
        assert_eq!(snap.running, 1);

        let snap = block.on_dropped_from_queue();
        assert_eq!(snap.queued, 0);
        assert_eq!(snap.dropped, 1);

        let snap = block.on_completed(Duration::from_millis(10));
        assert_eq!(snap.running, 0);
        assert_eq!(snap.completed, 1);
    }

    #[test]
    fn rejection_counts_only_dropped() {
        let block = StatsBlock::new();
        let snap = block.on_rejected();
        assert_eq!(snap.dropped, 1);
        assert_eq!(snap.queued, 0);
    }

    #[test]
    fn snapshot_serializes_with_observability_names() {
        let block = StatsBlock::new();
        block.on_queued();
        block.on_dispatched();
        block.on_completed(Duration::from_millis(50));

        let json = serde_json::to_value(block.snapshot()).unwrap();
        assert_eq!(json["completed"], 1);
        assert_eq!(json["averageExecutionTimeMs"], 50.0);
        assert_eq!(json["lastExecutionTimeMs"], 50.0);
    }
}
