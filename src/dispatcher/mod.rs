//! 调度执行器：获取代理池槽位、发送请求、按退避重试并发出唯一结果。
//!
//! # Dispatcher
//!
//! [`Dispatcher`] drives every accepted [`TrafficIntent`] to exactly one
//! [`Outcome`] (or, at shutdown, one counted drop):
//!
//! 1. resolve the suggested `(vendor, pool)`; unknown pairs fail immediately
//! 2. acquire a slot, waiting at most `pool_acquire_timeout`; an exhausted pool
//!    requeues the intent without spending a network attempt
//! 3. run one attempt under `attempt_timeout`, classify it, feed pool health
//! 4. succeed, fail, or schedule a retry after `base_delay * 2^n` (capped)
//!
//! Retries run on timer tasks and re-enter the shared work queue, so a backoff
//! never holds a worker or a slot. Retries of an intent whose pool turned
//! unhealthy fail over to a sibling pool of the same vendor.
//!
//! Intake is bounded: an intent is only pulled from its source once an
//! admission permit is free, and the permit returns when the intent is
//! finalized. Requeued work therefore never lets outstanding intents grow past
//! [`Dispatcher::max_outstanding`]. An intent that keeps finding its pool
//! exhausted fails with `pool_exhausted` after `max_exhausted_requeues`.
//! Vendors with a `rate_limit` defer attempts over budget the same way,
//! without counting against that cap.
//!
//! ## Shutdown
//!
//! Cancelling [`Dispatcher::shutdown_token`] stops intake. Queued intents that
//! never reached the network are counted in [`DispatchReport::shutdown_dropped`];
//! intents that already made an attempt get a terminal outcome with their last
//! error. In-flight attempts finish; no new retries start.

pub mod policy;
pub mod state;
pub mod stats;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, Mutex, Notify, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

use crate::config::{DispatchConfig, LoadgenConfig};
use crate::metrics::{noop_sink, MetricsSink};
use crate::scheduler::{RateLimiter, RateLimiterConfig, TrafficSource};
use crate::transport::{Transport, TransportError, TransportRequest};
use crate::types::{ErrorKind, OutcomeStatus, TrafficIntent};
use crate::vendor::{Health, RegistryError, VendorPool, VendorRegistry};

use policy::{AttemptVerdict, Decision};
use state::{LastAttempt, WorkItem};

pub use policy::{RetryPolicy, VendorOverrides};
pub use state::IntentState;
pub use stats::{DispatchReport, DispatchStats};

/// Exhausted-pool requeues back off like retries, but the exponent stops here.
const MAX_EXHAUSTED_BACKOFF_STEP: u32 = 4;

pub struct DispatcherBuilder {
    registry: Arc<VendorRegistry>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn MetricsSink>,
    dispatch: DispatchConfig,
    workers: Option<usize>,
    max_outstanding: Option<usize>,
    pacing: Option<RateLimiterConfig>,
    vendors: HashMap<String, VendorOverrides>,
    shutdown: Option<CancellationToken>,
}

impl DispatcherBuilder {
    pub fn new(registry: Arc<VendorRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            transport,
            sink: noop_sink(),
            dispatch: DispatchConfig::default(),
            workers: None,
            max_outstanding: None,
            pacing: None,
            vendors: HashMap::new(),
            shutdown: None,
        }
    }

    /// Dispatch knobs, per-vendor overrides and traffic pacing from a full configuration.
    pub fn with_config(self, cfg: &LoadgenConfig) -> Self {
        let mut builder = self.with_dispatch_config(cfg.dispatch.clone());
        for vendor in &cfg.vendors {
            let overrides = VendorOverrides::from_config(vendor);
            if !overrides.is_empty() {
                builder = builder.with_vendor_overrides(&vendor.id, overrides);
            }
        }
        if let Some(rps) = cfg.traffic.requests_per_second {
            builder = builder.with_requests_per_second(rps);
        }
        builder
    }

    pub fn with_dispatch_config(mut self, dispatch: DispatchConfig) -> Self {
        if let Some(n) = dispatch.workers {
            self.workers = Some(n);
        }
        self.dispatch = dispatch;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Cap how many accepted intents may be unfinished at once.
    pub fn with_max_outstanding(mut self, max: usize) -> Self {
        self.max_outstanding = Some(max);
        self
    }

    /// Cap how fast intents are accepted by [`Dispatcher::run`] and friends.
    pub fn with_requests_per_second(mut self, rps: f64) -> Self {
        self.pacing = RateLimiterConfig::from_rps(rps);
        self
    }

    pub fn with_vendor_overrides(mut self, vendor_id: impl Into<String>, overrides: VendorOverrides) -> Self {
        self.vendors.insert(vendor_id.into(), overrides);
        self
    }

    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    pub fn build(self) -> Dispatcher {
        let workers = self
            .workers
            .unwrap_or_else(|| self.registry.total_capacity())
            .max(1);
        let max_outstanding = self
            .max_outstanding
            .unwrap_or_else(|| self.dispatch.outstanding_limit(workers))
            .max(1);

        let mut policy = RetryPolicy::from_config(&self.dispatch);
        let mut vendor_limits = HashMap::new();
        for (vendor_id, overrides) in self.vendors {
            if let Some(cfg) = overrides.rate_limit.and_then(RateLimiterConfig::from_rps) {
                vendor_limits.insert(vendor_id.clone(), RateLimiter::new(cfg));
            }
            policy = policy.with_vendor(vendor_id, overrides);
        }

        Dispatcher {
            inner: Arc::new(Inner {
                policy,
                acquire_timeout: self.dispatch.pool_acquire_timeout(),
                max_exhausted_requeues: self.dispatch.max_exhausted_requeues,
                vendor_limits,
                registry: self.registry,
                transport: self.transport,
                sink: self.sink,
                stats: Arc::new(DispatchStats::default()),
                shutdown: self.shutdown.unwrap_or_default(),
                admission: Arc::new(Semaphore::new(max_outstanding)),
                outstanding: AtomicU64::new(0),
                idle: Notify::new(),
                timers: TaskTracker::new(),
            }),
            workers,
            max_outstanding,
            pacing: self.pacing,
        }
    }
}

/// Executes traffic intents against vendor pools.
pub struct Dispatcher {
    inner: Arc<Inner>,
    workers: usize,
    max_outstanding: usize,
    pacing: Option<RateLimiterConfig>,
}

impl Dispatcher {
    pub fn builder(registry: Arc<VendorRegistry>, transport: Arc<dyn Transport>) -> DispatcherBuilder {
        DispatcherBuilder::new(registry, transport)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Upper bound on accepted intents without an outcome or drop.
    pub fn max_outstanding(&self) -> usize {
        self.max_outstanding
    }

    /// Cancelling this token starts a graceful shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn stats(&self) -> DispatchReport {
        self.inner.stats.snapshot()
    }

    /// Live counters, for status endpoints.
    pub fn stats_handle(&self) -> Arc<DispatchStats> {
        self.inner.stats.clone()
    }

    /// Dispatch every intent until the source ends or shutdown is requested.
    pub async fn run<I>(&self, intents: I) -> DispatchReport
    where
        I: IntoIterator<Item = TrafficIntent>,
    {
        self.run_stream(futures::stream::iter(intents), None).await
    }

    /// Like [`Dispatcher::run`], but stop accepting intents after `limit`.
    ///
    /// Intents already accepted still run to completion, retries included.
    pub async fn run_for<I>(&self, intents: I, limit: Option<Duration>) -> DispatchReport
    where
        I: IntoIterator<Item = TrafficIntent>,
    {
        self.run_stream(futures::stream::iter(intents), limit).await
    }

    pub async fn run_stream<S>(&self, intents: S, limit: Option<Duration>) -> DispatchReport
    where
        S: Stream<Item = TrafficIntent>,
    {
        let source = TrafficSource::new("default", intents)
            .with_pacing(self.pacing.clone())
            .with_duration(limit);
        self.run_sources(vec![source]).await
    }

    /// Feed several sources side by side, each with its own pacing and duration.
    ///
    /// All sources share the worker pool, the admission bound and the retry
    /// queue. The run ends once every source has stopped and all accepted
    /// intents are finalized.
    pub async fn run_sources<S>(&self, sources: Vec<TrafficSource<S>>) -> DispatchReport
    where
        S: Stream<Item = TrafficIntent>,
    {
        let started = Instant::now();
        let (tx, rx) = mpsc::channel::<WorkItem>(self.workers);
        let rx = Arc::new(Mutex::new(rx));
        let stop = CancellationToken::new();
        self.inner.timers.reopen();

        let mut workers = JoinSet::new();
        for worker_id in 0..self.workers {
            workers.spawn(worker_loop(
                self.inner.clone(),
                worker_id,
                rx.clone(),
                tx.clone(),
                stop.clone(),
            ));
        }
        info!(
            workers = self.workers,
            max_outstanding = self.max_outstanding,
            sources = sources.len(),
            "dispatcher started"
        );

        futures::future::join_all(sources.into_iter().map(|source| self.feed(source, &tx))).await;
        debug!(
            outstanding = self.inner.outstanding.load(Ordering::Acquire),
            "intake closed, draining"
        );

        self.inner.wait_idle().await;
        stop.cancel();
        while let Some(res) = workers.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "dispatch worker panicked");
            }
        }
        self.inner.timers.close();
        self.inner.timers.wait().await;

        let report = self.inner.stats.snapshot();
        info!(
            accepted = report.accepted,
            succeeded = report.succeeded,
            failed = report.failed_terminal,
            shutdown_dropped = report.shutdown_dropped,
            attempts = report.attempts,
            retries = report.retries,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "dispatcher stopped"
        );
        report
    }

    /// Returns how many intents this source had accepted.
    async fn feed<S>(&self, source: TrafficSource<S>, tx: &mpsc::Sender<WorkItem>) -> u64
    where
        S: Stream<Item = TrafficIntent>,
    {
        let TrafficSource {
            name,
            intents,
            pacing,
            duration,
        } = source;
        let pacer = pacing.map(RateLimiter::new);
        let shutdown = &self.inner.shutdown;
        let deadline = async {
            match duration {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);
        tokio::pin!(intents);
        debug!(
            source = %name,
            rps = pacer.as_ref().map(RateLimiter::rps),
            duration_secs = duration.map(|d| d.as_secs()),
            "traffic source started"
        );

        let mut accepted = 0u64;
        loop {
            if let Some(pacer) = &pacer {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = &mut deadline => break,
                    _ = pacer.acquire() => {}
                }
            }

            // Admission bounds outstanding work; the permit comes back in `settle`.
            let admitted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = &mut deadline => break,
                permit = self.inner.admission.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let slot = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = &mut deadline => break,
                slot = tx.reserve() => match slot {
                    Ok(slot) => slot,
                    Err(_) => break,
                },
            };
            let Some(intent) = intents.next().await else {
                break;
            };

            admitted.forget();
            self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
            DispatchStats::incr(&self.inner.stats.accepted);
            accepted += 1;
            slot.send(WorkItem::new(intent));
        }

        debug!(source = %name, accepted, "traffic source stopped");
        accepted
    }
}

struct Inner {
    registry: Arc<VendorRegistry>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn MetricsSink>,
    policy: RetryPolicy,
    acquire_timeout: Duration,
    max_exhausted_requeues: u32,
    vendor_limits: HashMap<String, RateLimiter>,
    stats: Arc<DispatchStats>,
    shutdown: CancellationToken,
    /// One permit per intent that may be outstanding.
    admission: Arc<Semaphore>,
    /// Accepted intents without an outcome or drop yet.
    outstanding: AtomicU64,
    idle: Notify,
    timers: TaskTracker,
}

async fn worker_loop(
    inner: Arc<Inner>,
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    tx: mpsc::Sender<WorkItem>,
    stop: CancellationToken,
) {
    loop {
        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                item = rx.recv() => item,
                _ = stop.cancelled() => None,
            }
        };
        let Some(item) = next else {
            break;
        };
        inner.process(item, &tx).await;
    }
    trace!(worker_id, "worker stopped");
}

impl Inner {
    async fn process(self: &Arc<Self>, mut item: WorkItem, tx: &mpsc::Sender<WorkItem>) {
        if self.shutdown.is_cancelled() {
            self.finish_on_shutdown(item);
            return;
        }

        let pool = match self.pool_for(&item) {
            Ok(pool) => pool,
            Err(e) => {
                warn!(
                    intent_id = item.intent.id,
                    vendor = %item.intent.suggested_vendor,
                    pool = %item.intent.suggested_pool,
                    error = %e,
                    "cannot resolve vendor pool"
                );
                item.last.error_kind = Some(match e {
                    RegistryError::UnknownVendor { .. } => ErrorKind::UnknownVendor,
                    RegistryError::UnknownPool { .. } => ErrorKind::UnknownPool,
                });
                DispatchStats::incr(&self.stats.unresolved);
                self.finish(item, OutcomeStatus::FailedTerminal);
                return;
            }
        };

        item.pool = Some(pool.clone());
        item.transition(IntentState::Acquiring);
        if let Some(limiter) = self.vendor_limits.get(pool.vendor_id()) {
            if let Err(wait) = limiter.try_acquire().await {
                DispatchStats::incr(&self.stats.throttled);
                item.transition(IntentState::RetryPending);
                trace!(
                    intent_id = item.intent.id,
                    vendor = pool.vendor_id(),
                    wait_ms = wait.as_millis() as u64,
                    "vendor rate limited"
                );
                self.schedule_retry(item, wait, tx);
                return;
            }
        }

        let slot = match pool.acquire(self.acquire_timeout).await {
            Ok(slot) => slot,
            Err(e) => {
                item.exhausted += 1;
                DispatchStats::incr(&self.stats.pool_exhausted);
                if item.exhausted > self.max_exhausted_requeues {
                    debug!(
                        intent_id = item.intent.id,
                        requeues = item.exhausted - 1,
                        error = %e,
                        "giving up on exhausted pool"
                    );
                    item.last.error_kind = Some(ErrorKind::PoolExhausted);
                    self.finish(item, OutcomeStatus::FailedTerminal);
                    return;
                }
                item.transition(IntentState::RetryPending);
                let delay = self
                    .policy
                    .backoff_delay((item.exhausted - 1).min(MAX_EXHAUSTED_BACKOFF_STEP));
                self.schedule_retry(item, delay, tx);
                return;
            }
        };

        item.transition(IntentState::InFlight);
        let request = TransportRequest::for_attempt(&item.intent, &pool, item.attempts);
        item.attempts += 1;
        DispatchStats::incr(&self.stats.attempts);
        self.stats.in_flight.fetch_add(1, Ordering::Relaxed);

        let attempt_timeout = self.policy.attempt_timeout_for(pool.vendor_id());
        let started = Instant::now();
        let result = tokio::time::timeout(attempt_timeout, self.transport.execute(&request)).await;
        self.stats.in_flight.fetch_sub(1, Ordering::Relaxed);

        let verdict = match result {
            Ok(Ok(resp)) => {
                let last = LastAttempt {
                    status_code: Some(resp.status_code),
                    error_kind: None,
                    latency: resp.latency,
                };
                item.record_attempt(last, resp.bytes_sent, resp.bytes_received);
                self.policy.classify_status(resp.status_code)
            }
            Ok(Err(e)) => {
                debug!(
                    request_id = %request.request_id,
                    vendor = %request.vendor_id,
                    pool = %request.pool_id,
                    error = %e,
                    "attempt failed"
                );
                let last = LastAttempt {
                    latency: started.elapsed(),
                    ..LastAttempt::default()
                };
                item.record_attempt(last, 0, 0);
                self.policy.classify_error(&e)
            }
            Err(_) => {
                let last = LastAttempt {
                    latency: started.elapsed(),
                    ..LastAttempt::default()
                };
                item.record_attempt(last, 0, 0);
                self.policy.classify_error(&TransportError::Timeout {
                    after_ms: attempt_timeout.as_millis() as u64,
                })
            }
        };
        item.last.error_kind = verdict.error_kind();

        pool.record_attempt(verdict.is_success());
        if let Err(e) = pool.release(slot) {
            warn!(error = %e, "slot release rejected");
        }

        match self.policy.decide(verdict, item.retries, pool.vendor_id()) {
            Decision::Succeed => self.finish(item, OutcomeStatus::Succeeded),
            Decision::Fail => self.finish(item, OutcomeStatus::FailedTerminal),
            Decision::Retry { delay } => {
                item.retries += 1;
                DispatchStats::incr(&self.stats.retries);
                item.transition(IntentState::RetryPending);
                trace!(
                    intent_id = item.intent.id,
                    retry = item.retries,
                    delay_ms = delay.as_millis() as u64,
                    "retry scheduled"
                );
                self.schedule_retry(item, delay, tx);
            }
        }
    }

    /// First attempt resolves the suggestion; retries fail over away from an unhealthy pool.
    fn pool_for(&self, item: &WorkItem) -> Result<Arc<VendorPool>, RegistryError> {
        match &item.pool {
            Some(current) if current.health() == Health::Unhealthy => {
                match self.registry.failover_pool(current.vendor_id(), current.pool_id()) {
                    Some(next) => {
                        debug!(
                            intent_id = item.intent.id,
                            vendor = current.vendor_id(),
                            from = current.pool_id(),
                            to = next.pool_id(),
                            "failing over to sibling pool"
                        );
                        Ok(next)
                    }
                    None => Ok(current.clone()),
                }
            }
            Some(current) => Ok(current.clone()),
            None => self
                .registry
                .resolve(&item.intent.suggested_vendor, &item.intent.suggested_pool),
        }
    }

    fn schedule_retry(self: &Arc<Self>, item: WorkItem, delay: Duration, tx: &mpsc::Sender<WorkItem>) {
        if self.shutdown.is_cancelled() {
            self.finish_on_shutdown(item);
            return;
        }

        let inner = self.clone();
        let tx = tx.clone();
        self.timers.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if let Err(mpsc::error::SendError(item)) = tx.send(item).await {
                        inner.finish_on_shutdown(item);
                    }
                }
                _ = inner.shutdown.cancelled() => inner.finish_on_shutdown(item),
            }
        });
    }

    fn finish(&self, item: WorkItem, status: OutcomeStatus) {
        let outcome = item.into_outcome(status);
        match status {
            OutcomeStatus::Succeeded => DispatchStats::incr(&self.stats.succeeded),
            OutcomeStatus::FailedTerminal => DispatchStats::incr(&self.stats.failed_terminal),
        }
        trace!(
            intent_id = outcome.intent_id(),
            status = status.as_str(),
            attempts = outcome.attempt_count(),
            "outcome emitted"
        );
        self.sink.record(outcome);
        self.settle();
    }

    fn finish_on_shutdown(&self, item: WorkItem) {
        if item.attempts == 0 {
            DispatchStats::incr(&self.stats.shutdown_dropped);
            trace!(intent_id = item.intent.id, "intent dropped at shutdown");
            self.settle();
        } else {
            self.finish(item, OutcomeStatus::FailedTerminal);
        }
    }

    fn settle(&self) {
        self.admission.add_permits(1);
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.outstanding.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::InMemorySink;
    use crate::transport::TransportResponse;
    use crate::types::Destination;
    use crate::vendor::Vendor;
    use async_trait::async_trait;

    struct Always(u16);

    #[async_trait]
    impl Transport for Always {
        async fn execute(&self, _: &TransportRequest) -> Result<TransportResponse, TransportError> {
            Ok(TransportResponse {
                status_code: self.0,
                bytes_sent: 0,
                bytes_received: 10,
                latency: Duration::from_millis(1),
            })
        }
    }

    fn registry() -> Arc<VendorRegistry> {
        Arc::new(VendorRegistry::new([
            Vendor::new("vendor-a").with_pool(VendorPool::new("vendor-a", "dc-east", 2))
        ]))
    }

    fn intents(n: u64, vendor: &str, pool: &str) -> Vec<TrafficIntent> {
        let d = Arc::new(Destination::new("http://localhost:1").unwrap());
        (0..n)
            .map(|id| TrafficIntent::new(id, d.clone(), vendor, pool))
            .collect()
    }

    fn fast() -> DispatchConfig {
        DispatchConfig {
            base_delay_ms: 1,
            max_backoff_ms: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_successes_emit_one_outcome_each() {
        let sink = Arc::new(InMemorySink::new());
        let dispatcher = Dispatcher::builder(registry(), Arc::new(Always(200)))
            .with_dispatch_config(fast())
            .with_sink(sink.clone())
            .build();
        assert_eq!(dispatcher.workers(), 2);

        let report = dispatcher.run(intents(20, "vendor-a", "dc-east")).await;
        assert_eq!(report.accepted, 20);
        assert_eq!(report.succeeded, 20);
        assert_eq!(report.attempts, 20);
        assert_eq!(sink.len(), 20);
        assert!(sink.outcomes().iter().all(|o| o.is_success() && o.attempt_count() == 1));
    }

    #[tokio::test]
    async fn test_unknown_pool_fails_without_attempts() {
        let sink = Arc::new(InMemorySink::new());
        let dispatcher = Dispatcher::builder(registry(), Arc::new(Always(200)))
            .with_sink(sink.clone())
            .build();

        let report = dispatcher.run(intents(1, "vendor-a", "missing")).await;
        assert_eq!(report.failed_terminal, 1);
        assert_eq!(report.unresolved, 1);
        assert_eq!(report.attempts, 0);

        let outcome = &sink.outcomes()[0];
        assert_eq!(outcome.error_kind(), Some(ErrorKind::UnknownPool));
        assert_eq!(outcome.pool_id(), "missing");
        assert_eq!(outcome.attempt_count(), 0);
    }

    #[tokio::test]
    async fn test_permanent_status_is_not_retried() {
        let sink = Arc::new(InMemorySink::new());
        let dispatcher = Dispatcher::builder(registry(), Arc::new(Always(404)))
            .with_dispatch_config(fast())
            .with_sink(sink.clone())
            .build();

        let report = dispatcher.run(intents(3, "vendor-a", "dc-east")).await;
        assert_eq!(report.failed_terminal, 3);
        assert_eq!(report.retries, 0);
        assert!(sink
            .outcomes()
            .iter()
            .all(|o| o.error_kind() == Some(ErrorKind::PermanentStatus) && o.status_code() == Some(404)));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_accepts_nothing() {
        let dispatcher = Dispatcher::builder(registry(), Arc::new(Always(200))).build();
        dispatcher.shutdown();
        let report = dispatcher.run(intents(5, "vendor-a", "dc-east")).await;
        assert_eq!(report, DispatchReport::default());
    }
}
