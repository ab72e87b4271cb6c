//! # TaskSupervisor: spawns, tracks, and reconciles fetch-worker processes.
//!
//! Every fetch job runs as a separate OS process. The supervisor:
//! - spawns the worker through the [`ProcessHost`] and persists a task row
//!   (`running`, pid) — spawn failure is fatal to the call and leaves no row;
//! - forwards the worker's stdout/stderr to the operator log, best-effort;
//! - holds a `{task → pid}` table of live workers and reaps entries as their
//!   exit futures resolve;
//! - reconciles the row on exit: code 0 → `completed`, signal-caused exit →
//!   `terminated`, anything else → `failed`;
//! - terminates on request by signalling the recorded pid — a process that
//!   already exited still counts as terminated (idempotent).
//!
//! ## Lifecycle
//! ```text
//! start(spec) ──► host.spawn ──► insert row {running, pid}
//!                    │                │
//!                    │           stdout/stderr ──► operator log
//!                    ▼
//!              exit future ──► status by (code, signal) ──► update row
//!                                                           reap table entry
//!
//! terminate(id) ──► row lookup ──► send SIGTERM to pid
//!                                    │ ok or "no such process"
//!                                    ▼
//!                              status = terminated
//! ```
//!
//! ## Rules
//! - Store failures after exit are logged, never propagated: the row goes
//!   stale, in-memory state stays correct.
//! - Termination never mutates status when signal delivery fails for any
//!   reason other than "no such process".

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::store::{NewTask, StoreError, TaskFilter, TaskId, TaskPatch, TaskStatus, TaskStore};
use crate::supervisor::host::{ProcessExit, ProcessHost, Signal, SignalError, SpawnError};

/// What to run for one fetch job.
#[derive(Clone, Debug)]
pub struct JobSpec {
    /// Worker executable.
    pub command: String,
    /// Arguments passed to the worker.
    pub args: Vec<String>,
}

impl JobSpec {
    /// Creates a spec with no arguments.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
        }
    }

    /// Replaces the argument list.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// # Errors of job supervision.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// The worker process could not be started; no task row was created.
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// A task-lifecycle write failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// No task row with this id exists.
    #[error("no task with id {0}")]
    TaskNotFound(TaskId),

    /// Signal delivery failed for a reason other than "no such process";
    /// the task status was left untouched.
    #[error("failed to signal pid {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: SignalError,
    },
}

impl SupervisorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::Spawn(_) => "supervisor_spawn_failed",
            SupervisorError::Store(_) => "supervisor_store_failed",
            SupervisorError::TaskNotFound(_) => "supervisor_task_not_found",
            SupervisorError::Signal { .. } => "supervisor_signal_failed",
        }
    }
}

/// Spawns worker processes and keeps their durable records honest.
pub struct TaskSupervisor {
    store: Arc<dyn TaskStore>,
    host: Arc<dyn ProcessHost>,
    live: Arc<Mutex<HashMap<TaskId, u32>>>,
}

impl TaskSupervisor {
    /// Creates a supervisor over the given store and process host.
    pub fn new(store: Arc<dyn TaskStore>, host: Arc<dyn ProcessHost>) -> Self {
        Self {
            store,
            host,
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts a fetch job and returns its task id.
    ///
    /// ### Errors
    /// - [`SupervisorError::Spawn`] — the process could not be started; fatal,
    ///   no row is left behind.
    /// - [`SupervisorError::Store`] — the row insert failed; the just-spawned
    ///   worker is signalled best-effort so it does not run untracked.
    pub async fn start(&self, spec: &JobSpec) -> Result<TaskId, SupervisorError> {
        let mut proc = self.host.spawn(&spec.command, &spec.args).await?;
        let pid = proc.pid;

        let record = match self.store.insert(NewTask::running(pid)).await {
            Ok(record) => record,
            Err(err) => {
                let _ = self.host.send_signal(pid, Signal::Terminate);
                return Err(err.into());
            }
        };
        let id = record.id;

        if let Some(stdout) = proc.stdout.take() {
            forward_output(id, "stdout", stdout);
        }
        if let Some(stderr) = proc.stderr.take() {
            forward_output(id, "stderr", stderr);
        }

        lock_live(&self.live).insert(id, pid);
        let store = Arc::clone(&self.store);
        let live = Arc::clone(&self.live);
        let exit = proc.exit;
        tokio::spawn(async move {
            let status = exit.await;
            reconcile_exit(&*store, id, pid, status).await;
            lock_live(&live).remove(&id);
        });

        tracing::info!(task = %id, pid, command = %spec.command, "started fetch job");
        Ok(id)
    }

    /// Terminates a task by signalling its recorded pid.
    ///
    /// A worker that already exited counts as success, and the status still
    /// becomes `terminated` — repeated calls are idempotent.
    ///
    /// ### Errors
    /// - [`SupervisorError::TaskNotFound`] — no such row.
    /// - [`SupervisorError::Signal`] — delivery failed for a reason other
    ///   than "no such process"; the status is left untouched.
    pub async fn terminate(&self, id: TaskId) -> Result<(), SupervisorError> {
        let record = self
            .store
            .find_one(TaskFilter::by_id(id))
            .await?
            .ok_or(SupervisorError::TaskNotFound(id))?;

        match self.host.send_signal(record.pid, Signal::Terminate) {
            Ok(()) => {}
            Err(SignalError::ProcessNotFound) => {
                tracing::debug!(task = %id, pid = record.pid, "process already gone; terminated");
            }
            Err(source) => {
                return Err(SupervisorError::Signal {
                    pid: record.pid,
                    source,
                });
            }
        }

        self.store
            .update_where(
                TaskFilter::by_id(id),
                TaskPatch::touch().with_status(TaskStatus::Terminated),
            )
            .await?;
        tracing::info!(task = %id, pid = record.pid, "terminated fetch job");
        Ok(())
    }

    /// Returns the ids of workers whose exit has not been observed yet.
    pub fn active(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = lock_live(&self.live).keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

fn lock_live(
    live: &Arc<Mutex<HashMap<TaskId, u32>>>,
) -> MutexGuard<'_, HashMap<TaskId, u32>> {
    live.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Maps an observed exit onto the row status and persists it.
///
/// A store failure here is logged and swallowed: the durable row goes stale
/// but nothing else depends on the write.
async fn reconcile_exit(store: &dyn TaskStore, id: TaskId, pid: u32, status: ProcessExit) {
    let next = if status.code == Some(0) {
        TaskStatus::Completed
    } else if status.signal.is_some() {
        TaskStatus::Terminated
    } else {
        TaskStatus::Failed
    };
    tracing::info!(
        task = %id,
        pid,
        code = ?status.code,
        signal = ?status.signal,
        status = next.as_str(),
        "worker exited"
    );
    if let Err(err) = store
        .update_where(TaskFilter::by_id(id), TaskPatch::touch().with_status(next))
        .await
    {
        tracing::warn!(task = %id, error = %err, "failed to persist worker exit status");
    }
}

/// Forwards one worker output stream to the operator log, line by line.
/// Best-effort: read errors stop forwarding, never the worker.
fn forward_output(id: TaskId, stream: &'static str, reader: Box<dyn AsyncRead + Send + Unpin>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    tracing::info!(target: "fetchvisor::worker", task = %id, stream, "{line}");
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::debug!(task = %id, stream, error = %err, "output forwarding stopped");
                    break;
                }
            }
        }
    });
}
