//! # Stats observer interface.
//!
//! Limiters report every job transition through an explicit, synchronous
//! callback interface — there is no event-emitter or broadcast channel in
//! this path. Observers are registered on the
//! [`LimiterRegistry`](crate::limiter::LimiterRegistry) and shared by every
//! limiter it creates.
//!
//! ## Rules
//! - `on_transition` is invoked synchronously on the admitting/completing
//!   control flow, after the counters were updated and outside the limiter's
//!   state lock.
//! - Implementations must be cheap and must not block; anything slow belongs
//!   behind a channel owned by the observer itself.

use crate::limiter::stats::{LimiterStats, Transition};

/// Synchronous observer of limiter state transitions.
///
/// Receives the limiter name, the transition that just happened, and the
/// updated counter snapshot.
pub trait StatsObserver: Send + Sync + 'static {
    /// Called on every job transition of every limiter this observer watches.
    fn on_transition(&self, limiter: &str, transition: Transition, stats: &LimiterStats);

    /// Returns the observer name used in logs.
    ///
    /// Prefer short, descriptive names (e.g., "log", "metrics").
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Reference observer that writes transitions to the operator log.
///
/// Drops are logged at `warn` with the drop label, everything else at
/// `trace`. Implement a custom [`StatsObserver`] for metrics export.
#[derive(Debug, Default)]
pub struct LogObserver;

impl StatsObserver for LogObserver {
    fn on_transition(&self, limiter: &str, transition: Transition, stats: &LimiterStats) {
        match transition {
            Transition::Dropped => {
                tracing::warn!(
                    limiter,
                    queued = stats.queued,
                    dropped = stats.dropped,
                    "job dropped at admission"
                );
            }
            _ => {
                tracing::trace!(
                    limiter,
                    transition = transition.as_label(),
                    queued = stats.queued,
                    running = stats.running,
                    completed = stats.completed,
                    "limiter transition"
                );
            }
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
