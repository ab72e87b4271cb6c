//! # The fetch worker's inner loop.
//!
//! This module is what a spawned job process runs — the supervisor only
//! observes its exit. On a fixed interval the worker polls its target set,
//! batches targets by provider, skips anything on the exclusion list, and
//! issues one rate-limited call per target through the
//! [`AdmissionGate`](crate::gate::AdmissionGate), tagged with the worker's
//! own task id so limiter stats land on its task row.
//!
//! ## Loop
//! ```text
//! every poll_interval:
//!   targets    ◄── TargetSource::targets()
//!   exclusions ◄── TargetSource::exclusions()
//!   for (provider, batch) in batch_by_provider(targets):
//!       for target in batch:
//!           excluded?            ──► skip
//!           gate.run(fetch call) ──► TargetClient::fetch(target)
//!               duplicate/drop   ──► log, continue
//!               upstream failure ──► log, continue (execution still counts)
//!
//! SIGTERM/SIGINT ──► cancel the loop, exit cleanly
//! ```
//!
//! ## Rules
//! - One upstream call per target, always through the gate.
//! - A failing cycle never stops the loop; the error is logged and the next
//!   tick proceeds.
//! - The worker does not report its own exit; the parent supervisor observes
//!   and reconciles it.

mod signals;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::GateError;
use crate::gate::{AdmissionGate, GateRequest};
use crate::store::TaskId;

pub use signals::wait_for_termination_signal;

/// One fetchable target: a pool/contract on a named upstream provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchTarget {
    /// Target identity (e.g. a pool contract address); also the exclusion key.
    pub key: String,
    /// Upstream provider name — selects the limiter.
    pub provider: String,
}

impl FetchTarget {
    pub fn new(key: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            provider: provider.into(),
        }
    }
}

/// Supplies the worker's target set and exclusion list each cycle.
///
/// Backed by the pairs/blacklist tables in production; both live outside
/// this crate.
#[async_trait]
pub trait TargetSource: Send + Sync + 'static {
    /// Returns the current target set.
    async fn targets(&self) -> anyhow::Result<Vec<FetchTarget>>;

    /// Returns the keys to skip this cycle.
    async fn exclusions(&self) -> anyhow::Result<HashSet<String>>;
}

/// Performs one upstream fetch and stores the result.
///
/// The quote store the result lands in is external; the worker only cares
/// whether the call succeeded.
#[async_trait]
pub trait TargetClient: Send + Sync + 'static {
    /// Fetches one target.
    async fn fetch(&self, target: &FetchTarget) -> anyhow::Result<()>;
}

/// Worker loop configuration.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Interval between polling cycles.
    pub poll_interval: Duration,
    /// This worker's task id; attributed on every rate-limited call.
    pub task: Option<TaskId>,
}

impl Default for WorkerConfig {
    /// Polls every 5 s, with no task attribution.
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            task: None,
        }
    }
}

/// The recurrent fetch loop of one worker process.
pub struct FetchWorker {
    gate: Arc<AdmissionGate>,
    source: Arc<dyn TargetSource>,
    client: Arc<dyn TargetClient>,
    cfg: WorkerConfig,
}

impl FetchWorker {
    /// Creates a worker over the given gate and collaborators.
    pub fn new(
        gate: Arc<AdmissionGate>,
        source: Arc<dyn TargetSource>,
        client: Arc<dyn TargetClient>,
        cfg: WorkerConfig,
    ) -> Self {
        Self {
            gate,
            source,
            client,
            cfg,
        }
    }

    /// Runs the loop until `token` is cancelled or a termination signal
    /// arrives.
    pub async fn run(&self, token: CancellationToken) {
        let mut ticker = time::interval(self.cfg.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let shutdown = wait_for_termination_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = &mut shutdown => {
                    tracing::info!("termination signal received; stopping fetch loop");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.cycle().await {
                        tracing::warn!(error = %err, "fetch cycle failed");
                    }
                }
            }
        }
    }

    /// One polling cycle: refresh targets and exclusions, fetch everything
    /// that is not excluded.
    async fn cycle(&self) -> anyhow::Result<()> {
        let targets = self.source.targets().await?;
        let excluded = self.source.exclusions().await?;

        for (provider, batch) in batch_by_provider(targets) {
            for target in batch {
                if excluded.contains(&target.key) {
                    tracing::debug!(key = %target.key, "skipping excluded target");
                    continue;
                }
                self.fetch_one(&provider, &target).await;
            }
        }
        Ok(())
    }

    /// Issues one rate-limited fetch; per-target failures never propagate.
    async fn fetch_one(&self, provider: &str, target: &FetchTarget) {
        let mut req = GateRequest::new(provider, format!("/quote/{}/{}", provider, target.key));
        if let Some(task) = self.cfg.task {
            req = req.with_task(task);
        }

        match self.gate.run(&req, self.client.fetch(target)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                // The call executed and failed upstream; the limiter already
                // counted the execution.
                tracing::warn!(key = %target.key, provider, error = %err, "upstream fetch failed");
            }
            Err(GateError::DuplicateRequest) => {
                tracing::debug!(key = %target.key, "identical fetch already in flight");
            }
            Err(err) => {
                tracing::warn!(key = %target.key, provider, reason = err.as_label(), "fetch not admitted");
            }
        }
    }
}

/// Groups targets by provider name, preserving order within each group.
fn batch_by_provider(targets: Vec<FetchTarget>) -> BTreeMap<String, Vec<FetchTarget>> {
    let mut batches: BTreeMap<String, Vec<FetchTarget>> = BTreeMap::new();
    for target in targets {
        batches.entry(target.provider.clone()).or_default().push(target);
    }
    batches
}
