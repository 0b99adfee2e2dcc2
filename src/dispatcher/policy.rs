use std::collections::HashMap;
use std::time::Duration;

use crate::config::{DispatchConfig, StatusSet, VendorConfig};
use crate::transport::TransportError;
use crate::types::ErrorKind;

/// What to do after an attempt finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Succeed,
    Retry { delay: Duration },
    Fail,
}

/// Classification of a single network attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttemptVerdict {
    Success,
    Retryable(ErrorKind),
    Permanent(ErrorKind),
}

impl AttemptVerdict {
    pub fn is_success(self) -> bool {
        matches!(self, AttemptVerdict::Success)
    }

    pub fn error_kind(self) -> Option<ErrorKind> {
        match self {
            AttemptVerdict::Success => None,
            AttemptVerdict::Retryable(k) | AttemptVerdict::Permanent(k) => Some(k),
        }
    }
}

/// Settings one vendor overrides on top of the dispatch defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VendorOverrides {
    pub attempt_timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    /// Attempts per second across the vendor's pools.
    pub rate_limit: Option<f64>,
}

impl VendorOverrides {
    pub fn from_config(vendor: &VendorConfig) -> Self {
        Self {
            attempt_timeout: vendor.attempt_timeout(),
            max_retries: vendor.max_retries,
            rate_limit: vendor.rate_limit,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Retry and classification rules for the dispatcher.
///
/// Backoff after the N-th failed attempt (0-based) is `base_delay * 2^N`,
/// capped at `max_backoff`. Timeout and retry budget can be overridden per vendor.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub attempt_timeout: Duration,
    pub base_delay: Duration,
    pub max_backoff: Duration,
    success: StatusSet,
    retryable: StatusSet,
    retry_on_timeout: bool,
    retry_on_connect_error: bool,
    vendors: HashMap<String, VendorOverrides>,
}

impl RetryPolicy {
    pub fn from_config(cfg: &DispatchConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            attempt_timeout: cfg.attempt_timeout(),
            base_delay: cfg.base_delay(),
            max_backoff: cfg.max_backoff(),
            success: cfg.success_statuses.clone(),
            retryable: cfg.retryable_statuses.clone(),
            retry_on_timeout: cfg.retry_on_timeout,
            retry_on_connect_error: cfg.retry_on_connect_error,
            vendors: HashMap::new(),
        }
    }

    pub fn with_vendor(mut self, vendor_id: impl Into<String>, overrides: VendorOverrides) -> Self {
        self.vendors.insert(vendor_id.into(), overrides);
        self
    }

    pub fn attempt_timeout_for(&self, vendor_id: &str) -> Duration {
        self.vendors
            .get(vendor_id)
            .and_then(|v| v.attempt_timeout)
            .unwrap_or(self.attempt_timeout)
    }

    pub fn max_retries_for(&self, vendor_id: &str) -> u32 {
        self.vendors
            .get(vendor_id)
            .and_then(|v| v.max_retries)
            .unwrap_or(self.max_retries)
    }

    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis().min(u64::MAX as u128) as u64;
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = base_ms.saturating_mul(factor);
        Duration::from_millis(ms).min(self.max_backoff)
    }

    pub(crate) fn classify_status(&self, status: u16) -> AttemptVerdict {
        if self.success.contains(status) {
            AttemptVerdict::Success
        } else if self.retryable.contains(status) {
            AttemptVerdict::Retryable(ErrorKind::RetryableStatus)
        } else {
            AttemptVerdict::Permanent(ErrorKind::PermanentStatus)
        }
    }

    pub(crate) fn classify_error(&self, err: &TransportError) -> AttemptVerdict {
        match err {
            TransportError::Timeout { .. } if self.retry_on_timeout => AttemptVerdict::Retryable(ErrorKind::Timeout),
            TransportError::Timeout { .. } => AttemptVerdict::Permanent(ErrorKind::Timeout),
            TransportError::Connect(_) | TransportError::Setup(_) if self.retry_on_connect_error => {
                AttemptVerdict::Retryable(ErrorKind::ConnectError)
            }
            TransportError::Connect(_) | TransportError::Setup(_) => AttemptVerdict::Permanent(ErrorKind::ConnectError),
        }
    }

    /// `retries` is how many retries were already scheduled for this intent.
    pub(crate) fn decide(&self, verdict: AttemptVerdict, retries: u32, vendor_id: &str) -> Decision {
        match verdict {
            AttemptVerdict::Success => Decision::Succeed,
            AttemptVerdict::Permanent(_) => Decision::Fail,
            AttemptVerdict::Retryable(_) if retries < self.max_retries_for(vendor_id) => Decision::Retry {
                delay: self.backoff_delay(retries),
            },
            AttemptVerdict::Retryable(_) => Decision::Fail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::from_config(&DispatchConfig {
            max_retries: 3,
            base_delay_ms: 100,
            max_backoff_ms: 1_000,
            ..Default::default()
        })
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(p.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(p.backoff_delay(3), Duration::from_millis(800));
        assert_eq!(p.backoff_delay(4), Duration::from_millis(1_000));
        assert_eq!(p.backoff_delay(200), Duration::from_millis(1_000));
    }

    #[test]
    fn test_status_classification() {
        let p = policy();
        assert_eq!(p.classify_status(200), AttemptVerdict::Success);
        assert_eq!(p.classify_status(301), AttemptVerdict::Success);
        assert_eq!(
            p.classify_status(503),
            AttemptVerdict::Retryable(ErrorKind::RetryableStatus)
        );
        assert_eq!(
            p.classify_status(429),
            AttemptVerdict::Retryable(ErrorKind::RetryableStatus)
        );
        assert_eq!(
            p.classify_status(404),
            AttemptVerdict::Permanent(ErrorKind::PermanentStatus)
        );
    }

    #[test]
    fn test_error_classification_respects_flags() {
        let mut cfg = DispatchConfig::default();
        let p = RetryPolicy::from_config(&cfg);
        assert_eq!(
            p.classify_error(&TransportError::Timeout { after_ms: 5 }),
            AttemptVerdict::Retryable(ErrorKind::Timeout)
        );

        cfg.retry_on_connect_error = false;
        let p = RetryPolicy::from_config(&cfg);
        assert_eq!(
            p.classify_error(&TransportError::Connect("refused".into())),
            AttemptVerdict::Permanent(ErrorKind::ConnectError)
        );
    }

    #[test]
    fn test_retry_budget() {
        let p = policy();
        let v = AttemptVerdict::Retryable(ErrorKind::RetryableStatus);
        assert_eq!(
            p.decide(v, 0, "vendor-a"),
            Decision::Retry {
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(
            p.decide(v, 2, "vendor-a"),
            Decision::Retry {
                delay: Duration::from_millis(400)
            }
        );
        assert_eq!(p.decide(v, 3, "vendor-a"), Decision::Fail);
        assert_eq!(p.decide(AttemptVerdict::Success, 3, "vendor-a"), Decision::Succeed);
        assert_eq!(
            p.decide(AttemptVerdict::Permanent(ErrorKind::PermanentStatus), 0, "vendor-a"),
            Decision::Fail
        );
    }

    #[test]
    fn test_vendor_overrides() {
        let p = policy().with_vendor(
            "vendor-c",
            VendorOverrides {
                attempt_timeout: Some(Duration::from_secs(60)),
                max_retries: Some(1),
                rate_limit: None,
            },
        );
        let v = AttemptVerdict::Retryable(ErrorKind::Timeout);

        assert_eq!(p.attempt_timeout_for("vendor-a"), Duration::from_secs(10));
        assert_eq!(p.attempt_timeout_for("vendor-c"), Duration::from_secs(60));
        assert_eq!(p.max_retries_for("vendor-a"), 3);
        assert!(matches!(p.decide(v, 0, "vendor-c"), Decision::Retry { .. }));
        assert_eq!(p.decide(v, 1, "vendor-c"), Decision::Fail);
        assert!(matches!(p.decide(v, 1, "vendor-a"), Decision::Retry { .. }));
    }
}
