//! # AdmissionGate: the composed admission path.
//!
//! One gate fronts every rate-limited call the routing layer makes on behalf
//! of an inbound request or a fetch worker:
//!
//! ```text
//! inbound call
//!    │
//!    ▼
//! fingerprint ──► InFlightMap.try_admit ──► DuplicateRequest (refused)
//!    │ admitted (guard held)
//!    ▼
//! LimiterRegistry.get(provider) ──► NotFound
//!    │
//!    ▼
//! RateLimiter.schedule(job) ──► QueueFull / Displaced / Timeout
//!    │ executed
//!    ▼
//! task-scoped? ──► persist limiter stats snapshot into the task row
//!    │              (spawned, best-effort, never blocks the response)
//!    ▼
//! guard dropped — fingerprint released on every exit path
//! ```
//!
//! ## Rules
//! - Duplicates are surfaced to the caller, never retried internally.
//! - A failure of the wrapped call itself is carried in the job's own output;
//!   the gate reports it as a normal completion.
//! - Attribution writes are fire-and-forget: a persistence failure is logged
//!   and the in-memory counters stay authoritative.

use std::future::Future;
use std::sync::Arc;

use crate::dedup::{fingerprint, InFlightMap};
use crate::error::GateError;
use crate::limiter::{LimiterRegistry, RateLimiter};
use crate::store::{TaskFilter, TaskId, TaskPatch, TaskStore};

/// One admission-controlled call: which limiter, the request identity, and
/// the optional task to attribute stats to.
#[derive(Clone, Debug)]
pub struct GateRequest {
    /// Name of the limiter (upstream provider) to schedule under.
    pub limiter: String,
    /// Request path, part of the dedup fingerprint.
    pub path: String,
    /// Query pairs, normalized into the fingerprint.
    pub query: Vec<(String, String)>,
    /// Serialized request body, part of the fingerprint.
    pub body: Option<String>,
    /// Task to attribute the limiter's stats snapshot to, if any.
    pub task: Option<TaskId>,
}

impl GateRequest {
    /// Creates a request for `limiter` identified by `path`.
    pub fn new(limiter: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            limiter: limiter.into(),
            path: path.into(),
            query: Vec::new(),
            body: None,
            task: None,
        }
    }

    /// Adds a query pair to the fingerprint.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Sets the serialized body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Attributes this call's limiter stats to `task`.
    pub fn with_task(mut self, task: TaskId) -> Self {
        self.task = Some(task);
        self
    }

    /// Returns the deduplication fingerprint of this request.
    pub fn fingerprint(&self) -> String {
        fingerprint(
            &self.path,
            self.query.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            self.body.as_deref(),
        )
    }
}

/// Admission front door: deduplication, rate limiting, stats attribution.
///
/// Owned by the composition root next to the [`LimiterRegistry`].
pub struct AdmissionGate {
    registry: Arc<LimiterRegistry>,
    inflight: InFlightMap,
    store: Option<Arc<dyn TaskStore>>,
}

impl AdmissionGate {
    /// Creates a gate over `registry` with no stats attribution.
    pub fn new(registry: Arc<LimiterRegistry>) -> Self {
        Self {
            registry,
            inflight: InFlightMap::new(),
            store: None,
        }
    }

    /// Enables attribution of task-scoped calls into `store`.
    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Returns the in-flight map (to spawn its reaper, or for inspection).
    pub fn inflight(&self) -> &InFlightMap {
        &self.inflight
    }

    /// Runs `job` under the full admission path.
    ///
    /// ### Errors
    /// - [`GateError::DuplicateRequest`] — identical request already in flight
    /// - [`GateError::Limiter`] — no limiter registered under `req.limiter`
    /// - [`GateError::Dropped`] — the limiter dropped the job before execution
    pub async fn run<T, F>(&self, req: &GateRequest, job: F) -> Result<T, GateError>
    where
        F: Future<Output = T>,
    {
        let _guard = self
            .inflight
            .try_admit(req.fingerprint())
            .ok_or(GateError::DuplicateRequest)?;

        let limiter = self.registry.get(&req.limiter)?;
        let out = limiter.schedule(job).await?;

        if let Some(task) = req.task {
            self.attribute(task, &limiter);
        }
        Ok(out)
        // _guard drops here — and on every early return above.
    }

    /// Persists the limiter's updated snapshot into the task row.
    ///
    /// Spawned so the caller's response never waits on the store; a failed
    /// write is logged and the durable snapshot simply stays stale.
    fn attribute(&self, task: TaskId, limiter: &RateLimiter) {
        let Some(store) = &self.store else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = Arc::clone(store);
        let name = limiter.name().to_string();
        let snapshot = limiter.stats();
        handle.spawn(async move {
            let patch = TaskPatch::touch().with_limiter_stats(name.clone(), snapshot);
            match store.update_where(TaskFilter::by_id(task), patch).await {
                Ok(0) => {
                    tracing::debug!(%task, limiter = %name, "no task row to attribute stats to");
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(%task, limiter = %name, error = %err, "stats attribution write failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdmissionError;
    use crate::limiter::LimiterConfig;
    use crate::store::{MemoryTaskStore, NewTask, TaskStatus};
    use tokio::sync::oneshot;

    fn gate_with_limiter(name: &str) -> AdmissionGate {
        let registry = Arc::new(LimiterRegistry::new());
        registry
            .create(name, LimiterConfig::default())
            .expect("create limiter");
        AdmissionGate::new(registry)
    }

    #[tokio::test]
    async fn duplicate_in_flight_request_is_refused() {
        let gate = Arc::new(gate_with_limiter("eth"));
        let req = GateRequest::new("eth", "/quote/eth").with_query("pool", "0xabc");

        let (release, parked) = oneshot::channel::<()>();
        let g = Arc::clone(&gate);
        let r = req.clone();
        let first = tokio::spawn(async move {
            g.run(&r, async {
                let _ = parked.await;
            })
            .await
        });

        // Wait until the first call holds the fingerprint.
        let key = req.fingerprint();
        while !gate.inflight().contains(&key) {
            tokio::task::yield_now().await;
        }

        let dup = gate.run(&req, async {}).await;
        assert!(matches!(dup.unwrap_err(), GateError::DuplicateRequest));

        release.send(()).expect("release first call");
        first.await.expect("join").expect("first call admitted");

        // Fingerprint released on completion; the same request is admitted again.
        gate.run(&req, async {}).await.expect("re-admission");
    }

    #[tokio::test]
    async fn fingerprint_is_released_on_the_error_path() {
        let registry = Arc::new(LimiterRegistry::new());
        registry
            .create(
                "eth",
                LimiterConfig {
                    reservoir_capacity: 0,
                    refill_amount: 0,
                    queue_capacity: 0,
                    ..LimiterConfig::default()
                },
            )
            .expect("create limiter");
        let gate = AdmissionGate::new(registry);
        let req = GateRequest::new("eth", "/quote/eth");

        // No tokens, no queue: every call is dropped at admission...
        let out = gate.run(&req, async {}).await;
        assert!(matches!(
            out.unwrap_err(),
            GateError::Dropped(AdmissionError::QueueFull)
        ));
        // ...and the fingerprint is still released.
        assert!(gate.inflight().is_empty());
    }

    #[tokio::test]
    async fn unknown_limiter_is_surfaced() {
        let gate = gate_with_limiter("eth");
        let req = GateRequest::new("unregistered", "/quote/x");
        let out = gate.run(&req, async {}).await;
        assert!(matches!(out.unwrap_err(), GateError::Limiter(_)));
    }

    #[tokio::test]
    async fn task_scoped_calls_attribute_limiter_stats() {
        let registry = Arc::new(LimiterRegistry::new());
        registry
            .create("eth", LimiterConfig::default())
            .expect("create limiter");
        let store = Arc::new(MemoryTaskStore::new());
        let gate = AdmissionGate::new(registry).with_store(store.clone());

        let row = store.insert(NewTask::running(9000)).await.expect("insert");
        let req = GateRequest::new("eth", "/quote/eth")
            .with_query("pool", "0xabc")
            .with_task(row.id);
        gate.run(&req, async {}).await.expect("admitted");

        // The attribution write is spawned; let it land.
        let snapshot = loop {
            let rec = store
                .find_one(TaskFilter::by_id(row.id))
                .await
                .expect("find")
                .expect("row exists");
            if let Some(stats) = rec.extra_info.limiter_stats.get("eth") {
                break *stats;
            }
            tokio::task::yield_now().await;
        };
        assert_eq!(snapshot.completed, 1);

        let rec = store
            .find_one(TaskFilter::by_id(row.id))
            .await
            .expect("find")
            .expect("row exists");
        assert_eq!(rec.status, TaskStatus::Running);
    }
}
