//! In-flight request deduplication.
//!
//! ## Contents
//! - [`fingerprint`] — deterministic request identity (path + normalized
//!   query + serialized body)
//! - [`InFlightMap`], [`InFlightGuard`] — atomic admit with scoped release
//! - a background reaper evicting entries older than [`DEFAULT_TTL`]

mod fingerprint;
mod inflight;

pub use fingerprint::fingerprint;
pub use inflight::{InFlightGuard, InFlightMap, DEFAULT_TTL, REAP_INTERVAL};
