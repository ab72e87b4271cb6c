//! Out-of-process worker supervision.
//!
//! ## Contents
//! - [`TaskSupervisor`], [`JobSpec`] — spawn, track, reconcile, terminate
//! - [`ProcessHost`], [`TokioProcessHost`] — the OS-process collaborator seam
//! - [`CrashRecoveryScanner`] — startup reconciliation of orphaned rows
//!
//! Task rows themselves live in [`store`](crate::store); the worker's inner
//! fetch loop lives in [`worker`](crate::worker).

mod core;
mod host;
mod recovery;

pub use core::{JobSpec, SupervisorError, TaskSupervisor};
pub use host::{
    ProcessExit, ProcessHandle, ProcessHost, Signal, SignalError, SpawnError, TokioProcessHost,
};
pub use recovery::CrashRecoveryScanner;
