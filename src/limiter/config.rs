//! # Per-limiter admission configuration.
//!
//! [`LimiterConfig`] bundles every knob of one named limiter: the concurrency
//! cap, inter-start spacing, the token reservoir and its timed refill, the
//! bounded wait queue with its [`OverflowPolicy`], and the admission timeout.
//!
//! ## Sentinel values
//! - `max_concurrent = 0` → unlimited (no concurrency cap)
//! - `min_interval = 0` → no spacing between dispatches
//! - `admission_timeout = 0` → queued jobs wait indefinitely
//!
//! Prefer the helper accessors over sprinkling sentinel checks across the
//! codebase.

use std::time::Duration;

/// What to do with a new submission when the wait queue is at capacity.
///
/// The policy is deterministic: the same queue state and the same submission
/// always produce the same outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Refuse the newcomer; queued jobs are untouched.
    ///
    /// Use when:
    /// - Submission order carries priority (oldest wins)
    /// - Callers can surface a "try later" condition
    RejectNew,

    /// Evict the earliest-queued job to make room for the newcomer.
    ///
    /// Use when:
    /// - Fresh requests are more valuable than stale ones
    /// - Example: quote fetching, where an old queued fetch is already out of date
    DropOldest,
}

impl OverflowPolicy {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            OverflowPolicy::RejectNew => "reject_new",
            OverflowPolicy::DropOldest => "drop_oldest",
        }
    }
}

/// Configuration of one named limiter.
///
/// ## Field semantics
/// - `max_concurrent`: jobs allowed to run simultaneously (`0` = unlimited)
/// - `min_interval`: minimum spacing between two consecutive dispatches
/// - `reservoir_capacity`: token-bucket size; each dispatch consumes one token
/// - `refill_amount` / `refill_interval`: tokens added per refill tick,
///   capped at `reservoir_capacity`
/// - `queue_capacity`: bound on the FIFO wait queue
/// - `overflow_policy`: behavior when the queue is full
/// - `admission_timeout`: how long a job may wait in the queue before it is
///   dropped (`0` = wait indefinitely); never cancels dispatched work
#[derive(Clone, Debug)]
pub struct LimiterConfig {
    /// Maximum number of jobs running at once (`0` = unlimited).
    pub max_concurrent: usize,

    /// Minimum time between the start of two consecutive jobs.
    pub min_interval: Duration,

    /// Initial and maximum number of reservoir tokens.
    pub reservoir_capacity: u64,

    /// Tokens restored on each refill tick.
    pub refill_amount: u64,

    /// Interval between refill ticks.
    pub refill_interval: Duration,

    /// Maximum number of jobs waiting for admission.
    pub queue_capacity: usize,

    /// Behavior when the wait queue is at capacity.
    pub overflow_policy: OverflowPolicy,

    /// Maximum time a job may spend waiting in the queue (`0` = no limit).
    pub admission_timeout: Duration,
}

impl LimiterConfig {
    /// Returns the concurrency cap as an `Option` (`None` = unlimited).
    #[inline]
    pub fn concurrency_limit(&self) -> Option<usize> {
        if self.max_concurrent == 0 {
            None
        } else {
            Some(self.max_concurrent)
        }
    }

    /// Returns the admission timeout as an `Option` (`None` = wait forever).
    #[inline]
    pub fn admission_deadline(&self) -> Option<Duration> {
        if self.admission_timeout == Duration::ZERO {
            None
        } else {
            Some(self.admission_timeout)
        }
    }
}

impl Default for LimiterConfig {
    /// Defaults mirror the reference upstream-provider deployment:
    ///
    /// - one job at a time, no inter-start spacing
    /// - reservoir of 200 tokens, 100 refilled every 60 s
    /// - queue of 200, drop-oldest on overflow
    /// - 5 s admission timeout
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            min_interval: Duration::ZERO,
            reservoir_capacity: 200,
            refill_amount: 100,
            refill_interval: Duration::from_secs(60),
            queue_capacity: 200,
            overflow_policy: OverflowPolicy::DropOldest,
            admission_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_accessors() {
        let mut cfg = LimiterConfig::default();
        assert_eq!(cfg.concurrency_limit(), Some(1));
        assert_eq!(cfg.admission_deadline(), Some(Duration::from_secs(5)));

        cfg.max_concurrent = 0;
        cfg.admission_timeout = Duration::ZERO;
        assert_eq!(cfg.concurrency_limit(), None);
        assert_eq!(cfg.admission_deadline(), None);
    }
}
