//! # RateLimiter: per-provider admission gate.
//!
//! One limiter guards one rate-limited upstream provider. A job admitted by
//! [`RateLimiter::schedule`] must hold, at dispatch time:
//! - a free concurrency slot (`max_concurrent`),
//! - one reservoir token,
//! - the minimum inter-start spacing (`min_interval`) since the last dispatch.
//!
//! Jobs that cannot dispatch immediately wait in a bounded FIFO queue. The
//! reservoir refills by `refill_amount` every `refill_interval`, capped at
//! `reservoir_capacity`.
//!
//! ## Job state machine
//! ```text
//! schedule(job)
//!    │
//!    ├─ slot+token+interval free ──► running ──► completed
//!    │                                            (execution happened,
//!    │                                             wrapped result is the caller's)
//!    ├─ queue has room ──► queued ──► running ──► completed
//!    │                        │
//!    │                        ├─ displaced by newer job ──► dropped
//!    │                        └─ admission timeout      ──► dropped
//!    │
//!    └─ queue full, RejectNew ──► dropped
//! ```
//!
//! ## Rules
//! - Queued jobs dispatch strictly in FIFO order; a newcomer never overtakes
//!   the queue even when it could dispatch immediately.
//! - An admission timeout cancels only the *waiting*; dispatched work always
//!   runs to completion and its slot is returned by an RAII permit, even if
//!   the caller's future is dropped mid-execution.
//! - Counter updates and observer callbacks happen synchronously with each
//!   transition; observers are invoked outside the state lock.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::AdmissionError;
use crate::limiter::config::{LimiterConfig, OverflowPolicy};
use crate::limiter::observer::StatsObserver;
use crate::limiter::stats::{LimiterStats, StatsBlock, Transition};

/// Reply sent to a queued waiter once its fate is decided.
///
/// A grant carries the dispatch permit so that an abandoned reply (receiver
/// dropped before reading it) rolls the dispatch back instead of leaking the
/// slot and token.
enum AdmitReply {
    Admitted(DispatchPermit),
    Displaced,
}

/// One queued admission request.
struct Waiter {
    id: u64,
    tx: oneshot::Sender<AdmitReply>,
}

/// Mutable limiter state, guarded by one mutex.
///
/// Invariants (with the lock held):
/// - `running ≤ max_concurrent` (when a cap is configured)
/// - `queue.len() ≤ queue_capacity`
/// - `tokens ≤ reservoir_capacity`
struct QueueState {
    tokens: u64,
    running: usize,
    last_dispatch: Option<Instant>,
    queue: VecDeque<Waiter>,
    next_waiter: u64,
    wakeup_armed: bool,
}

struct Inner {
    name: Arc<str>,
    cfg: LimiterConfig,
    stats: StatsBlock,
    observers: Arc<[Arc<dyn StatsObserver>]>,
    state: Mutex<QueueState>,
}

/// Outcome of the locked admission phase.
enum AdmitWait {
    Immediate,
    Queued(u64, oneshot::Receiver<AdmitReply>),
}

/// Per-name admission gate with token reservoir, bounded FIFO queue, and
/// concurrency cap.
///
/// Cheap to clone; clones share the same state and stats. Construct through
/// [`LimiterRegistry`](crate::limiter::LimiterRegistry), which also spawns
/// the refill loop.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub(crate) fn new(
        name: &str,
        cfg: LimiterConfig,
        observers: Arc<[Arc<dyn StatsObserver>]>,
    ) -> Self {
        let tokens = cfg.reservoir_capacity;
        Self {
            inner: Arc::new(Inner {
                name: Arc::from(name),
                cfg,
                stats: StatsBlock::new(),
                observers,
                state: Mutex::new(QueueState {
                    tokens,
                    running: 0,
                    last_dispatch: None,
                    queue: VecDeque::new(),
                    next_waiter: 0,
                    wakeup_armed: false,
                }),
            }),
        }
    }

    /// Returns the limiter name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the limiter configuration.
    pub fn config(&self) -> &LimiterConfig {
        &self.inner.cfg
    }

    /// Returns the current counter snapshot.
    pub fn stats(&self) -> LimiterStats {
        self.inner.stats.snapshot()
    }

    /// Admits `job` under the limiter's policy and executes it.
    ///
    /// On admission the job runs to completion and its output is returned;
    /// the execution counts as completed regardless of what the job's own
    /// output says. `Err` means the job was dropped *before* execution:
    ///
    /// - [`AdmissionError::QueueFull`] — queue at capacity, `RejectNew` policy
    /// - [`AdmissionError::Displaced`] — evicted by a newer job, `DropOldest` policy
    /// - [`AdmissionError::Timeout`] — waited longer than `admission_timeout`
    pub async fn schedule<T, F>(&self, job: F) -> Result<T, AdmissionError>
    where
        F: Future<Output = T>,
    {
        let dispatch = self.admit().await?;

        // The permit returns the slot and records completion even when the
        // caller drops this future mid-execution.
        let _permit = dispatch.into_execution();
        Ok(job.await)
    }

    /// Waits until the job may start, or returns the drop reason.
    async fn admit(&self) -> Result<DispatchPermit, AdmissionError> {
        let mut events = Vec::new();
        let decision = {
            let mut st = self.inner.lock_state();
            let now = Instant::now();

            if st.queue.is_empty() && self.inner.can_dispatch(&st, now) {
                self.inner.mark_dispatch(&mut st, now);
                events.push((Transition::Queued, self.inner.stats.on_queued()));
                events.push((Transition::Running, self.inner.stats.on_dispatched()));
                Ok(AdmitWait::Immediate)
            } else if st.queue.len() >= self.inner.cfg.queue_capacity
                && !self.inner.displace_oldest(&mut st, &mut events)
            {
                events.push((Transition::Dropped, self.inner.stats.on_rejected()));
                Err(AdmissionError::QueueFull)
            } else {
                let id = st.next_waiter;
                st.next_waiter += 1;
                let (tx, rx) = oneshot::channel();
                st.queue.push_back(Waiter { id, tx });
                events.push((Transition::Queued, self.inner.stats.on_queued()));
                // When only the inter-start spacing blocks us, this arms the
                // wakeup that will dispatch the queue once it elapses.
                Inner::pump(&self.inner, &mut st, &mut events);
                Ok(AdmitWait::Queued(id, rx))
            }
        };
        self.inner.emit(&events);

        let (id, mut rx) = match decision? {
            AdmitWait::Immediate => return Ok(DispatchPermit::new(Arc::clone(&self.inner))),
            AdmitWait::Queued(id, rx) => (id, rx),
        };

        match self.inner.cfg.admission_deadline() {
            None => settle(rx.await),
            Some(limit) => {
                let deadline = time::sleep(limit);
                tokio::pin!(deadline);
                tokio::select! {
                    reply = &mut rx => settle(reply),
                    _ = &mut deadline => {
                        if self.inner.remove_waiter(id) {
                            Err(AdmissionError::Timeout)
                        } else {
                            // Admission was decided while the timer fired;
                            // the reply is already in the channel.
                            settle((&mut rx).await)
                        }
                    }
                }
            }
        }
    }
}

/// Maps a waiter reply onto the admission result.
fn settle(
    reply: Result<AdmitReply, oneshot::error::RecvError>,
) -> Result<DispatchPermit, AdmissionError> {
    match reply {
        Ok(AdmitReply::Admitted(permit)) => Ok(permit),
        Ok(AdmitReply::Displaced) | Err(_) => Err(AdmissionError::Displaced),
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn has_slot(&self, st: &QueueState) -> bool {
        match self.cfg.concurrency_limit() {
            None => true,
            Some(cap) => st.running < cap,
        }
    }

    /// Remaining wait until `min_interval` has elapsed since the last
    /// dispatch, or `None` when dispatch is allowed now.
    fn interval_wait(&self, st: &QueueState, now: Instant) -> Option<Duration> {
        if self.cfg.min_interval.is_zero() {
            return None;
        }
        let ready = st.last_dispatch? + self.cfg.min_interval;
        if now >= ready {
            None
        } else {
            Some(ready - now)
        }
    }

    fn can_dispatch(&self, st: &QueueState, now: Instant) -> bool {
        self.has_slot(st) && st.tokens > 0 && self.interval_wait(st, now).is_none()
    }

    fn mark_dispatch(&self, st: &mut QueueState, now: Instant) {
        st.tokens -= 1;
        st.running += 1;
        st.last_dispatch = Some(now);
    }

    /// Evicts the earliest-queued waiter under the `DropOldest` policy.
    ///
    /// Returns `false` when the policy is `RejectNew` or there is nothing to
    /// evict (zero-capacity queue), in which case the newcomer is refused.
    fn displace_oldest(
        &self,
        st: &mut QueueState,
        events: &mut Vec<(Transition, LimiterStats)>,
    ) -> bool {
        if self.cfg.overflow_policy != OverflowPolicy::DropOldest {
            return false;
        }
        match st.queue.pop_front() {
            Some(victim) => {
                let _ = victim.tx.send(AdmitReply::Displaced);
                events.push((Transition::Dropped, self.stats.on_dropped_from_queue()));
                true
            }
            None => false,
        }
    }

    /// Removes a timed-out waiter. Returns `false` when the waiter was
    /// already dispatched or displaced concurrently.
    fn remove_waiter(&self, id: u64) -> bool {
        let dropped = {
            let mut st = self.lock_state();
            match st.queue.iter().position(|w| w.id == id) {
                Some(pos) => {
                    st.queue.remove(pos);
                    Some(self.stats.on_dropped_from_queue())
                }
                None => None,
            }
        };
        match dropped {
            Some(snap) => {
                self.notify(Transition::Dropped, &snap);
                true
            }
            None => false,
        }
    }

    /// Dispatches queued waiters while a slot, a token, and the inter-start
    /// spacing allow. Call with the state lock held; emit `events` after
    /// releasing it.
    fn pump(inner: &Arc<Inner>, st: &mut QueueState, events: &mut Vec<(Transition, LimiterStats)>) {
        let now = Instant::now();
        loop {
            if st.queue.is_empty() || !inner.has_slot(st) || st.tokens == 0 {
                break;
            }
            if let Some(wait) = inner.interval_wait(st, now) {
                Inner::arm_interval_wakeup(inner, st, wait);
                break;
            }
            let Some(waiter) = st.queue.pop_front() else {
                break;
            };
            let prev_dispatch = st.last_dispatch;
            inner.mark_dispatch(st, now);
            events.push((Transition::Running, inner.stats.on_dispatched()));
            let permit = DispatchPermit::new(Arc::clone(inner));
            if let Err(reply) = waiter.tx.send(AdmitReply::Admitted(permit)) {
                // The waiter's future was dropped while queued. Disarm the
                // returned permit (its drop would need this lock) and roll
                // the dispatch back here instead.
                if let AdmitReply::Admitted(mut permit) = reply {
                    permit.armed = false;
                }
                st.tokens = (st.tokens + 1).min(inner.cfg.reservoir_capacity);
                st.running -= 1;
                st.last_dispatch = prev_dispatch;
                events.push((Transition::Dropped, inner.stats.on_abandoned()));
            }
        }
    }

    /// Schedules a pump once `min_interval` allows the next dispatch.
    /// At most one wakeup is armed at a time.
    fn arm_interval_wakeup(inner: &Arc<Inner>, st: &mut QueueState, wait: Duration) {
        if st.wakeup_armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            // Outside a runtime there is nobody to wake us; the next refill
            // tick or completion will pump instead.
            return;
        };
        st.wakeup_armed = true;
        let inner = Arc::clone(inner);
        handle.spawn(async move {
            time::sleep(wait).await;
            let mut events = Vec::new();
            {
                let mut st = inner.lock_state();
                st.wakeup_armed = false;
                Inner::pump(&inner, &mut st, &mut events);
            }
            inner.emit(&events);
        });
    }

    fn notify(&self, transition: Transition, stats: &LimiterStats) {
        for obs in self.observers.iter() {
            obs.on_transition(&self.name, transition, stats);
        }
    }

    fn emit(&self, events: &[(Transition, LimiterStats)]) {
        for (transition, stats) in events {
            self.notify(*transition, stats);
        }
    }
}

/// A granted dispatch that has not started executing yet.
///
/// Converted into an [`ExecutionPermit`] the moment the job starts. If it is
/// dropped armed — the admitted caller vanished between grant and execution —
/// the slot and token are returned and the job counts as dropped.
struct DispatchPermit {
    inner: Arc<Inner>,
    armed: bool,
}

impl DispatchPermit {
    fn new(inner: Arc<Inner>) -> Self {
        Self { inner, armed: true }
    }

    /// Starts the execution clock and disarms the rollback.
    fn into_execution(mut self) -> ExecutionPermit {
        self.armed = false;
        ExecutionPermit {
            inner: Arc::clone(&self.inner),
            started: Instant::now(),
        }
    }
}

impl Drop for DispatchPermit {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut events = Vec::new();
        {
            let mut st = self.inner.lock_state();
            st.tokens = (st.tokens + 1).min(self.inner.cfg.reservoir_capacity);
            st.running = st.running.saturating_sub(1);
            events.push((Transition::Dropped, self.inner.stats.on_abandoned()));
            Inner::pump(&self.inner, &mut st, &mut events);
        }
        self.inner.emit(&events);
    }
}

/// RAII permit held for the duration of one execution.
///
/// Dropping it returns the concurrency slot, records the completion with its
/// duration, and pumps the queue — on the success path, on caller
/// cancellation, and on panic alike.
struct ExecutionPermit {
    inner: Arc<Inner>,
    started: Instant,
}

impl Drop for ExecutionPermit {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        let mut events = Vec::new();
        {
            let mut st = self.inner.lock_state();
            st.running = st.running.saturating_sub(1);
            events.push((Transition::Completed, self.inner.stats.on_completed(elapsed)));
            Inner::pump(&self.inner, &mut st, &mut events);
        }
        self.inner.emit(&events);
    }
}

impl RateLimiter {
    /// Spawns the background refill loop, cancelled through `token`.
    ///
    /// Every `refill_interval`, restores `refill_amount` tokens (capped at
    /// `reservoir_capacity`) and dispatches eligible queued jobs. Must be
    /// called from within a Tokio runtime; the registry does this on
    /// [`create`](crate::limiter::LimiterRegistry::create).
    pub(crate) fn spawn_refill(&self, token: CancellationToken) {
        let inner = Arc::clone(&self.inner);
        let period = inner.cfg.refill_interval;
        if period.is_zero() || inner.cfg.refill_amount == 0 {
            return;
        }
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let mut events = Vec::new();
                        {
                            let mut st = inner.lock_state();
                            st.tokens =
                                (st.tokens + inner.cfg.refill_amount).min(inner.cfg.reservoir_capacity);
                            Inner::pump(&inner, &mut st, &mut events);
                        }
                        inner.emit(&events);
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(cfg: LimiterConfig) -> (RateLimiter, CancellationToken) {
        let observers = Arc::from(Vec::<Arc<dyn StatsObserver>>::new());
        let lim = RateLimiter::new("test", cfg, observers);
        let token = CancellationToken::new();
        lim.spawn_refill(token.clone());
        (lim, token)
    }

    /// Yields until `cond` holds; panics if it never does.
    async fn settle_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..20_000 {
            if cond() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition not reached while settling");
    }

    #[tokio::test(start_paused = true)]
    async fn reservoir_admits_at_most_capacity_before_refill() {
        let (lim, _token) = limiter(LimiterConfig {
            max_concurrent: 1,
            min_interval: Duration::ZERO,
            reservoir_capacity: 200,
            refill_amount: 100,
            refill_interval: Duration::from_secs(60),
            queue_capacity: 200,
            overflow_policy: OverflowPolicy::DropOldest,
            admission_timeout: Duration::ZERO,
        });

        for _ in 0..300 {
            let l = lim.clone();
            tokio::spawn(async move { l.schedule(async {}).await });
        }

        // Exactly the reservoir drains before the first refill tick.
        settle_until(|| lim.stats().completed == 200).await;
        let snap = lim.stats();
        assert_eq!(snap.completed, 200);
        assert_eq!(snap.queued, 100);
        assert_eq!(snap.dropped, 0);

        // One refill of 100 tokens lets the whole queue through.
        time::advance(Duration::from_secs(60)).await;
        settle_until(|| lim.stats().completed == 300).await;
        assert_eq!(lim.stats().queued, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_drops_oldest_deterministically() {
        let (lim, _token) = limiter(LimiterConfig {
            max_concurrent: 1,
            reservoir_capacity: 10,
            refill_amount: 0,
            queue_capacity: 1,
            overflow_policy: OverflowPolicy::DropOldest,
            admission_timeout: Duration::ZERO,
            ..LimiterConfig::default()
        });

        let (release, gate) = oneshot::channel::<()>();
        let l1 = lim.clone();
        let h1 = tokio::spawn(async move {
            l1.schedule(async {
                let _ = gate.await;
            })
            .await
        });
        settle_until(|| lim.stats().running == 1).await;

        let l2 = lim.clone();
        let h2 = tokio::spawn(async move { l2.schedule(async {}).await });
        settle_until(|| lim.stats().queued == 1).await;

        // The newcomer evicts the earliest-queued job, never itself.
        let l3 = lim.clone();
        let h3 = tokio::spawn(async move { l3.schedule(async {}).await });
        let displaced = h2.await.expect("join h2");
        assert_eq!(displaced.unwrap_err(), AdmissionError::Displaced);
        assert_eq!(lim.stats().dropped, 1);

        release.send(()).expect("release first job");
        assert!(h1.await.expect("join h1").is_ok());
        assert!(h3.await.expect("join h3").is_ok());
        assert_eq!(lim.stats().completed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_rejects_newcomer_when_configured() {
        let (lim, _token) = limiter(LimiterConfig {
            max_concurrent: 1,
            reservoir_capacity: 10,
            refill_amount: 0,
            queue_capacity: 1,
            overflow_policy: OverflowPolicy::RejectNew,
            admission_timeout: Duration::ZERO,
            ..LimiterConfig::default()
        });

        let (release, gate) = oneshot::channel::<()>();
        let l1 = lim.clone();
        let h1 = tokio::spawn(async move {
            l1.schedule(async {
                let _ = gate.await;
            })
            .await
        });
        settle_until(|| lim.stats().running == 1).await;

        let l2 = lim.clone();
        let h2 = tokio::spawn(async move { l2.schedule(async {}).await });
        settle_until(|| lim.stats().queued == 1).await;

        // Queue full: the newcomer is refused, the queued job is untouched.
        let res = lim.schedule(async {}).await;
        assert_eq!(res.unwrap_err(), AdmissionError::QueueFull);
        assert_eq!(lim.stats().dropped, 1);
        assert_eq!(lim.stats().queued, 1);

        release.send(()).expect("release first job");
        assert!(h1.await.expect("join h1").is_ok());
        assert!(h2.await.expect("join h2").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn queued_job_times_out_but_running_job_is_untouched() {
        let (lim, _token) = limiter(LimiterConfig {
            max_concurrent: 1,
            reservoir_capacity: 10,
            refill_amount: 0,
            queue_capacity: 10,
            admission_timeout: Duration::from_secs(5),
            ..LimiterConfig::default()
        });

        let (release, gate) = oneshot::channel::<()>();
        let l1 = lim.clone();
        let h1 = tokio::spawn(async move {
            l1.schedule(async {
                let _ = gate.await;
            })
            .await
        });
        settle_until(|| lim.stats().running == 1).await;

        let l2 = lim.clone();
        let h2 = tokio::spawn(async move { l2.schedule(async {}).await });
        settle_until(|| lim.stats().queued == 1).await;

        time::advance(Duration::from_millis(5_100)).await;
        let timed_out = h2.await.expect("join h2");
        assert_eq!(timed_out.unwrap_err(), AdmissionError::Timeout);
        assert_eq!(lim.stats().dropped, 1);
        // The timeout cancelled only the waiting, never dispatched work.
        assert_eq!(lim.stats().running, 1);

        release.send(()).expect("release first job");
        assert!(h1.await.expect("join h1").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn queued_jobs_dispatch_in_fifo_order() {
        let (lim, _token) = limiter(LimiterConfig {
            max_concurrent: 1,
            reservoir_capacity: 100,
            refill_amount: 0,
            queue_capacity: 10,
            admission_timeout: Duration::ZERO,
            ..LimiterConfig::default()
        });

        let order: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let (release, gate) = oneshot::channel::<()>();
        let l0 = lim.clone();
        let h0 = tokio::spawn(async move {
            l0.schedule(async {
                let _ = gate.await;
            })
            .await
        });
        settle_until(|| lim.stats().running == 1).await;

        let mut handles = Vec::new();
        for i in 1..=4 {
            let l = lim.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                l.schedule(async move {
                    order.lock().expect("order lock").push(i);
                })
                .await
            }));
            settle_until(|| lim.stats().queued == i as u64).await;
        }

        release.send(()).expect("release first job");
        assert!(h0.await.expect("join h0").is_ok());
        for h in handles {
            assert!(h.await.expect("join queued").is_ok());
        }
        assert_eq!(*order.lock().expect("order lock"), vec![1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn min_interval_spaces_dispatches() {
        let (lim, _token) = limiter(LimiterConfig {
            max_concurrent: 2,
            min_interval: Duration::from_millis(100),
            reservoir_capacity: 100,
            refill_amount: 0,
            queue_capacity: 10,
            admission_timeout: Duration::ZERO,
            ..LimiterConfig::default()
        });

        for _ in 0..3 {
            let l = lim.clone();
            tokio::spawn(async move { l.schedule(async {}).await });
        }

        settle_until(|| lim.stats().completed == 1).await;
        assert_eq!(lim.stats().completed, 1);

        time::advance(Duration::from_millis(100)).await;
        settle_until(|| lim.stats().completed == 2).await;

        time::advance(Duration::from_millis(100)).await;
        settle_until(|| lim.stats().completed == 3).await;
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_queued_job_releases_its_resources() {
        let (lim, _token) = limiter(LimiterConfig {
            max_concurrent: 1,
            reservoir_capacity: 2,
            refill_amount: 0,
            queue_capacity: 10,
            admission_timeout: Duration::ZERO,
            ..LimiterConfig::default()
        });

        let (release, gate) = oneshot::channel::<()>();
        let l1 = lim.clone();
        let h1 = tokio::spawn(async move {
            l1.schedule(async {
                let _ = gate.await;
            })
            .await
        });
        settle_until(|| lim.stats().running == 1).await;

        let l2 = lim.clone();
        let h2 = tokio::spawn(async move { l2.schedule(async {}).await });
        settle_until(|| lim.stats().queued == 1).await;

        // The queued caller disappears without ever being polled again.
        h2.abort();
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }

        release.send(()).expect("release first job");
        assert!(h1.await.expect("join h1").is_ok());
        settle_until(|| lim.stats().dropped == 1).await;

        // Slot and token came back: a fresh job is admitted immediately.
        lim.schedule(async {}).await.expect("fresh admission");
        let snap = lim.stats();
        assert_eq!(snap.completed, 2);
        assert_eq!(snap.running, 0);
        assert_eq!(snap.queued, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_counts_even_when_the_wrapped_call_fails() {
        let (lim, _token) = limiter(LimiterConfig {
            reservoir_capacity: 10,
            ..LimiterConfig::default()
        });

        let out: Result<Result<(), &str>, _> = lim.schedule(async { Err("upstream down") }).await;
        // The execution happened; the failure belongs to the caller.
        assert_eq!(out.expect("admission"), Err("upstream down"));
        assert_eq!(lim.stats().completed, 1);
        assert_eq!(lim.stats().dropped, 0);
    }
}
