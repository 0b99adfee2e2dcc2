use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live dispatcher counters, shared with the status endpoints.
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub(crate) accepted: AtomicU64,
    pub(crate) succeeded: AtomicU64,
    pub(crate) failed_terminal: AtomicU64,
    pub(crate) shutdown_dropped: AtomicU64,
    pub(crate) attempts: AtomicU64,
    pub(crate) retries: AtomicU64,
    pub(crate) pool_exhausted: AtomicU64,
    pub(crate) throttled: AtomicU64,
    pub(crate) unresolved: AtomicU64,
    pub(crate) in_flight: AtomicU64,
}

impl DispatchStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchReport {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        DispatchReport {
            accepted: load(&self.accepted),
            succeeded: load(&self.succeeded),
            failed_terminal: load(&self.failed_terminal),
            shutdown_dropped: load(&self.shutdown_dropped),
            attempts: load(&self.attempts),
            retries: load(&self.retries),
            pool_exhausted: load(&self.pool_exhausted),
            throttled: load(&self.throttled),
            unresolved: load(&self.unresolved),
            in_flight: load(&self.in_flight),
        }
    }
}

/// Point-in-time dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Intents taken from the source.
    pub accepted: u64,
    pub succeeded: u64,
    pub failed_terminal: u64,
    /// Accepted intents discarded at shutdown before any network attempt.
    pub shutdown_dropped: u64,
    /// Network attempts started.
    pub attempts: u64,
    /// Retries scheduled after failed network attempts.
    pub retries: u64,
    /// Acquire calls that timed out.
    pub pool_exhausted: u64,
    /// Attempts deferred by a vendor rate limit.
    pub throttled: u64,
    /// Intents whose vendor or pool did not resolve. Included in `failed_terminal`.
    pub unresolved: u64,
    /// Attempts on the wire right now.
    pub in_flight: u64,
}

impl DispatchReport {
    pub fn outcomes(&self) -> u64 {
        self.succeeded + self.failed_terminal
    }

    /// Accepted intents that have neither an outcome nor a drop yet.
    pub fn outstanding(&self) -> u64 {
        self.accepted
            .saturating_sub(self.outcomes())
            .saturating_sub(self.shutdown_dropped)
    }

    pub fn success_rate(&self) -> f64 {
        match self.outcomes() {
            0 => 0.0,
            n => self.succeeded as f64 / n as f64,
        }
    }
}
