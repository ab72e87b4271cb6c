//! Error types for the admission layer.
//!
//! This module defines the errors surfaced by limiters and the admission gate:
//!
//! - [`AdmissionError`] — a job was dropped before execution (queue overflow,
//!   displacement, or admission timeout).
//! - [`RegistryError`] — limiter lookup/registration failures.
//! - [`GateError`] — errors of the composed admission path (deduplication,
//!   limiter lookup, admission).
//!
//! Supervision and persistence errors live next to their components
//! ([`SupervisorError`](crate::supervisor::SupervisorError),
//! [`StoreError`](crate::store::StoreError)).
//!
//! All enums provide `as_label()` returning a short stable snake_case label
//! for logs and metrics.

use thiserror::Error;

/// # A job was dropped at admission, before any execution happened.
///
/// These are terminal for the affected job: the limiter never ran the wrapped
/// call, and the caller should surface the condition rather than retry
/// internally. A job that *was* dispatched is never cancelled by the limiter;
/// only waiting can time out.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    /// The wait queue was at capacity and the overflow policy rejects newcomers.
    #[error("admission queue full")]
    QueueFull,

    /// The job was queued, then evicted to make room for a newer submission
    /// (drop-oldest overflow policy).
    #[error("displaced from admission queue by a newer job")]
    Displaced,

    /// The job waited in the queue longer than the configured admission timeout.
    #[error("timed out waiting for admission")]
    Timeout,
}

impl AdmissionError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            AdmissionError::QueueFull => "admission_queue_full",
            AdmissionError::Displaced => "admission_displaced",
            AdmissionError::Timeout => "admission_timeout",
        }
    }
}

/// # Limiter registry failures.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A limiter with this name is already registered.
    #[error("limiter '{0}' already registered")]
    DuplicateName(String),

    /// No limiter with this name exists.
    #[error("no limiter named '{0}'")]
    NotFound(String),
}

impl RegistryError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RegistryError::DuplicateName(_) => "registry_duplicate_name",
            RegistryError::NotFound(_) => "registry_not_found",
        }
    }
}

/// # Errors of the composed admission path (dedup → limiter → execution).
///
/// The gate never retries internally: a duplicate is reported to the caller
/// as-is, and drops are terminal. A failure of the *wrapped call itself* is
/// not a `GateError` — the job's own output carries it, and the limiter still
/// counts the execution as completed.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum GateError {
    /// An identical request is already in flight (same fingerprint).
    #[error("identical request already in flight")]
    DuplicateRequest,

    /// The named limiter does not exist.
    #[error(transparent)]
    Limiter(#[from] RegistryError),

    /// The limiter dropped the job before execution.
    #[error(transparent)]
    Dropped(#[from] AdmissionError),
}

impl GateError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            GateError::DuplicateRequest => "gate_duplicate_request",
            GateError::Limiter(e) => e.as_label(),
            GateError::Dropped(e) => e.as_label(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(AdmissionError::QueueFull.as_label(), "admission_queue_full");
        assert_eq!(AdmissionError::Timeout.as_label(), "admission_timeout");
        assert_eq!(
            RegistryError::NotFound("x".into()).as_label(),
            "registry_not_found"
        );
        assert_eq!(
            GateError::Dropped(AdmissionError::Displaced).as_label(),
            "admission_displaced"
        );
    }
}
