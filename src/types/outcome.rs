//! Terminal results of traffic intents.

use std::time::{Duration, SystemTime};

use serde::Serialize;

/// Final status of an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    FailedTerminal,
}

impl OutcomeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeStatus::Succeeded => "succeeded",
            OutcomeStatus::FailedTerminal => "failed_terminal",
        }
    }
}

/// Why the last attempt of an intent did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PoolExhausted,
    ConnectError,
    Timeout,
    RetryableStatus,
    PermanentStatus,
    UnknownVendor,
    UnknownPool,
    InvalidHandle,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::PoolExhausted => "pool_exhausted",
            ErrorKind::ConnectError => "connect_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RetryableStatus => "retryable_status",
            ErrorKind::PermanentStatus => "permanent_status",
            ErrorKind::UnknownVendor => "unknown_vendor",
            ErrorKind::UnknownPool => "unknown_pool",
            ErrorKind::InvalidHandle => "invalid_handle",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single terminal record of one intent.
///
/// Built once by the dispatcher and handed to the sink by value. Latency and
/// byte counts describe the final attempt; `total_elapsed` spans every attempt
/// and backoff.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub(crate) intent_id: u64,
    pub(crate) vendor_id: String,
    pub(crate) pool_id: String,
    pub(crate) destination_host: String,
    pub(crate) method: String,
    pub(crate) status: OutcomeStatus,
    pub(crate) status_code: Option<u16>,
    pub(crate) error_kind: Option<ErrorKind>,
    #[serde(with = "duration_ms")]
    pub(crate) latency: Duration,
    #[serde(with = "duration_ms")]
    pub(crate) total_elapsed: Duration,
    pub(crate) bytes_sent: u64,
    pub(crate) bytes_received: u64,
    pub(crate) attempt_count: u32,
    pub(crate) timestamp: SystemTime,
}

impl Outcome {
    pub fn intent_id(&self) -> u64 {
        self.intent_id
    }

    pub fn vendor_id(&self) -> &str {
        &self.vendor_id
    }

    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }

    pub fn destination_host(&self) -> &str {
        &self.destination_host
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn status(&self) -> OutcomeStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Succeeded
    }

    /// HTTP status of the final attempt, if one got a response.
    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }

    pub fn total_elapsed(&self) -> Duration {
        self.total_elapsed
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Network attempts made. Pool-exhausted waits are not attempts.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64() * 1000.0)
    }
}
