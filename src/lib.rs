//! # fetchvisor
//!
//! **Fetchvisor** is the admission-control and job-supervision layer for a
//! data-fetching backend.
//!
//! It governs how many concurrent calls reach rate-limited upstream
//! providers, deduplicates in-flight identical requests, and manages the
//! lifecycle of long-running fetch workers spawned as separate processes,
//! persisting their state so the system recovers after a crash.
//!
//! ## Architecture
//! ### Request path
//! ```text
//!  inbound call
//!      │
//!      ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  AdmissionGate                                                    │
//! │  - fingerprint + InFlightMap (one in-flight call per identity)    │
//! │  - LimiterRegistry lookup by provider name                        │
//! │  - stats attribution to the calling task (best-effort)            │
//! └──────┬────────────────────────────────────────────────────────────┘
//!        ▼
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ RateLimiter  │   │ RateLimiter  │   │ RateLimiter  │   (one per provider)
//! │ tokens/queue │   │ tokens/queue │   │ tokens/queue │
//! └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!        │ transitions      │                  │
//!        ▼                  ▼                  ▼
//!   StatsBlock ──────► StatsObserver (synchronous callbacks)
//! ```
//!
//! ### Job path
//! ```text
//! start(JobSpec) ──► TaskSupervisor ──► ProcessHost.spawn ──► worker process
//!                        │                                       │
//!                        │ insert row {running, pid}             │ FetchWorker loop:
//!                        │ forward stdout/stderr                 │  poll targets,
//!                        ▼                                       │  batch by provider,
//!                  exit observed ──► row reconciled              │  gate-admitted calls
//!                  (completed / failed / terminated)             ▼
//!                                                         SIGTERM ► clean exit
//!
//! startup: CrashRecoveryScanner marks orphaned `running` rows as `failed`
//! ```
//!
//! ## Features
//! | Area              | Description                                                        | Key types / traits                      |
//! |-------------------|--------------------------------------------------------------------|-----------------------------------------|
//! | **Rate limiting** | Token reservoir, concurrency cap, FIFO queue, overflow policies.   | [`RateLimiter`], [`LimiterConfig`]      |
//! | **Registry**      | Named limiters owned by the composition root.                      | [`LimiterRegistry`]                     |
//! | **Deduplication** | One in-flight call per fingerprint, scoped release, reaper.        | [`InFlightMap`], [`fingerprint`]        |
//! | **Admission**     | The composed path the routing layer consumes.                      | [`AdmissionGate`], [`GateRequest`]      |
//! | **Supervision**   | Process-per-job lifecycle with durable rows and crash recovery.    | [`TaskSupervisor`], [`CrashRecoveryScanner`] |
//! | **Persistence**   | Narrow store contract; in-memory reference implementation.         | [`TaskStore`], [`MemoryTaskStore`]      |
//! | **Worker**        | The fetch loop running inside spawned job processes.               | [`FetchWorker`]                         |
//! | **Observability** | Synchronous stats callbacks and the status snapshot.               | [`StatsObserver`], [`StatusReport`]     |
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use fetchvisor::{
//!     AdmissionGate, CrashRecoveryScanner, GateRequest, JobSpec, LimiterConfig,
//!     LimiterRegistry, MemoryTaskStore, TaskSupervisor, TokioProcessHost,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     fetchvisor::init_tracing();
//!     let store = Arc::new(MemoryTaskStore::new());
//!
//!     // Reconcile rows orphaned by a previous crash, before any traffic.
//!     CrashRecoveryScanner::new(store.clone()).run().await?;
//!
//!     // One limiter per upstream provider.
//!     let registry = Arc::new(LimiterRegistry::new());
//!     registry.create("alchemy", LimiterConfig::default())?;
//!
//!     // The admission front door used by every rate-limited call.
//!     let gate = AdmissionGate::new(registry).with_store(store.clone());
//!     gate.inflight().spawn_reaper(CancellationToken::new());
//!
//!     let req = GateRequest::new("alchemy", "/quote/eth").with_query("pool", "0xabc");
//!     let quote = gate.run(&req, async { fetch_quote().await }).await?;
//!     println!("quote: {quote}");
//!
//!     // Spawn a supervised fetch job, then stop it.
//!     let supervisor = TaskSupervisor::new(store, Arc::new(TokioProcessHost));
//!     let task = supervisor.start(&JobSpec::new("fetch-worker")).await?;
//!     supervisor.terminate(task).await?;
//!     Ok(())
//! }
//!
//! async fn fetch_quote() -> f64 {
//!     0.0421
//! }
//! ```

pub mod dedup;
pub mod gate;
pub mod limiter;
pub mod status;
pub mod store;
pub mod supervisor;
pub mod telemetry;
pub mod worker;

mod error;

// ---- Public re-exports ----

pub use dedup::{fingerprint, InFlightGuard, InFlightMap};
pub use error::{AdmissionError, GateError, RegistryError};
pub use gate::{AdmissionGate, GateRequest};
pub use limiter::{
    LimiterConfig, LimiterRegistry, LimiterStats, LogObserver, OverflowPolicy, RateLimiter,
    StatsBlock, StatsObserver, Transition,
};
pub use status::StatusReport;
pub use store::{
    MemoryTaskStore, NewTask, StoreError, TaskFilter, TaskId, TaskPatch, TaskRecord, TaskStatus,
    TaskStore,
};
pub use supervisor::{
    CrashRecoveryScanner, JobSpec, ProcessHandle, ProcessHost, Signal, SupervisorError,
    TaskSupervisor, TokioProcessHost,
};
pub use telemetry::init_tracing;
pub use worker::{FetchTarget, FetchWorker, TargetClient, TargetSource, WorkerConfig};
