use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use crate::types::{ErrorKind, Outcome, OutcomeStatus, TrafficIntent};
use crate::vendor::VendorPool;

/// Lifecycle of an intent inside the dispatcher.
///
/// ```text
/// Pending -> Acquiring -> InFlight -> Succeeded
///               |            |-----> FailedTerminal
///               |            `-----> RetryPending -> Acquiring
///               `----(exhausted)---> RetryPending
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentState {
    Pending,
    Acquiring,
    InFlight,
    RetryPending,
    Succeeded,
    FailedTerminal,
}

impl IntentState {
    pub fn is_terminal(self) -> bool {
        matches!(self, IntentState::Succeeded | IntentState::FailedTerminal)
    }

    /// Whether the transition `self -> next` is part of the lifecycle.
    pub fn can_transition_to(self, next: IntentState) -> bool {
        use IntentState::*;
        matches!(
            (self, next),
            (Pending, Acquiring)
                | (Pending, FailedTerminal)
                | (Acquiring, InFlight)
                | (Acquiring, RetryPending)
                | (Acquiring, FailedTerminal)
                | (InFlight, Succeeded)
                | (InFlight, RetryPending)
                | (InFlight, FailedTerminal)
                | (RetryPending, Acquiring)
                | (RetryPending, FailedTerminal)
        )
    }
}

/// Result of the most recent network attempt. Byte counts are totalled on the item.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LastAttempt {
    pub status_code: Option<u16>,
    pub error_kind: Option<ErrorKind>,
    pub latency: Duration,
}

/// An intent owned by the dispatcher until it is finalized.
///
/// Finalizing consumes the item, so at most one outcome can be built per intent.
#[derive(Debug)]
pub(crate) struct WorkItem {
    pub intent: TrafficIntent,
    pub state: IntentState,
    pub pool: Option<Arc<VendorPool>>,
    /// Network attempts made.
    pub attempts: u32,
    /// Retries scheduled after failed network attempts.
    pub retries: u32,
    /// Times the pool was exhausted on acquire.
    pub exhausted: u32,
    /// Bytes across every network attempt.
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub last: LastAttempt,
    pub started_at: Instant,
}

impl WorkItem {
    pub fn new(intent: TrafficIntent) -> Self {
        Self {
            intent,
            state: IntentState::Pending,
            pool: None,
            attempts: 0,
            retries: 0,
            exhausted: 0,
            bytes_sent: 0,
            bytes_received: 0,
            last: LastAttempt::default(),
            started_at: Instant::now(),
        }
    }

    /// Store the result of a finished network attempt.
    pub fn record_attempt(&mut self, last: LastAttempt, bytes_sent: u64, bytes_received: u64) {
        self.bytes_sent = self.bytes_sent.saturating_add(bytes_sent);
        self.bytes_received = self.bytes_received.saturating_add(bytes_received);
        self.last = last;
    }

    pub fn transition(&mut self, next: IntentState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }

    pub fn into_outcome(mut self, status: OutcomeStatus) -> Outcome {
        self.transition(match status {
            OutcomeStatus::Succeeded => IntentState::Succeeded,
            OutcomeStatus::FailedTerminal => IntentState::FailedTerminal,
        });

        let (vendor_id, pool_id) = match &self.pool {
            Some(pool) => (pool.vendor_id().to_string(), pool.pool_id().to_string()),
            None => (self.intent.suggested_vendor.clone(), self.intent.suggested_pool.clone()),
        };
        Outcome {
            intent_id: self.intent.id,
            vendor_id,
            pool_id,
            destination_host: self.intent.destination.host().to_string(),
            method: self.intent.method.as_str().to_string(),
            status,
            status_code: self.last.status_code,
            error_kind: match status {
                OutcomeStatus::Succeeded => None,
                OutcomeStatus::FailedTerminal => self.last.error_kind,
            },
            latency: self.last.latency,
            total_elapsed: self.started_at.elapsed(),
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            attempt_count: self.attempts,
            timestamp: SystemTime::now(),
        }
    }
}
