//! 指标汇聚：接收每个意图唯一的结果记录并导出。
//!
//! # Metrics Sinks
//!
//! The dispatcher hands every [`Outcome`] to a [`MetricsSink`]. `record` never
//! blocks and never fails; a slow backend must not stall dispatch.
//!
//! | Sink | Use |
//! |------|-----|
//! | [`BufferedSink`] | Bounded drop-oldest queue flushed to an [`OutcomeExporter`] by a background task |
//! | [`PrometheusMetrics`] | Exporter that aggregates outcomes into Prometheus families |
//! | [`LoggingSink`] | One structured log line per outcome |
//! | [`InMemorySink`] | Keeps outcomes for inspection in tests |
//! | [`CompositeSink`] | Fans out to several sinks |
//! | [`NoopSink`] | Discards everything |

pub mod buffered;
pub mod prometheus;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::info;

use crate::types::Outcome;
use crate::Result;

pub use self::prometheus::PrometheusMetrics;
pub use buffered::BufferedSink;

/// Receives exactly one outcome per finished intent.
pub trait MetricsSink: Send + Sync {
    fn record(&self, outcome: Outcome);

    /// Outcomes discarded because the sink was full or closed.
    fn dropped(&self) -> u64 {
        0
    }

    /// Batches the backend failed to accept.
    fn export_errors(&self) -> u64 {
        0
    }
}

/// Async backend drained by [`BufferedSink`].
#[async_trait]
pub trait OutcomeExporter: Send + Sync {
    async fn export(&self, outcome: &Outcome) -> Result<()>;

    async fn export_batch(&self, outcomes: &[Outcome]) -> Result<()> {
        for o in outcomes {
            self.export(o).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// No-op sink.
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn record(&self, _: Outcome) {}
}

pub fn noop_sink() -> Arc<dyn MetricsSink> {
    Arc::new(NoopSink)
}

/// In-memory sink for testing.
#[derive(Default)]
pub struct InMemorySink {
    outcomes: Mutex<Vec<Outcome>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outcomes(&self) -> Vec<Outcome> {
        self.outcomes.lock().map(|o| o.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.outcomes.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut o) = self.outcomes.lock() {
            o.clear();
        }
    }
}

impl MetricsSink for InMemorySink {
    fn record(&self, outcome: Outcome) {
        if let Ok(mut o) = self.outcomes.lock() {
            o.push(outcome);
        }
    }
}

/// Logs each outcome through `tracing`.
pub struct LoggingSink;

impl MetricsSink for LoggingSink {
    fn record(&self, o: Outcome) {
        info!(
            target: "proxy_loadgen::outcome",
            intent_id = o.intent_id(),
            vendor = o.vendor_id(),
            pool = o.pool_id(),
            host = o.destination_host(),
            method = o.method(),
            status = o.status().as_str(),
            status_code = o.status_code(),
            error_kind = o.error_kind().map(|k| k.as_str()),
            attempts = o.attempt_count(),
            latency_ms = o.latency().as_millis() as u64,
            "intent finished"
        );
    }
}

/// Fans each outcome out to every child sink.
pub struct CompositeSink {
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl CompositeSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn add(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl Default for CompositeSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for CompositeSink {
    fn record(&self, outcome: Outcome) {
        let Some((last, rest)) = self.sinks.split_last() else {
            return;
        };
        for sink in rest {
            sink.record(outcome.clone());
        }
        last.record(outcome);
    }

    fn dropped(&self) -> u64 {
        self.sinks.iter().map(|s| s.dropped()).sum()
    }

    fn export_errors(&self) -> u64 {
        self.sinks.iter().map(|s| s.export_errors()).sum()
    }
}

#[cfg(test)]
pub(crate) fn sample_outcome(intent_id: u64, status_code: Option<u16>) -> Outcome {
    use crate::types::{ErrorKind, OutcomeStatus};
    use std::time::{Duration, SystemTime};

    let ok = matches!(status_code, Some(c) if c < 400);
    Outcome {
        intent_id,
        vendor_id: "vendor-a".into(),
        pool_id: "dc-east".into(),
        destination_host: "httpbin.org".into(),
        method: "GET".into(),
        status: if ok {
            OutcomeStatus::Succeeded
        } else {
            OutcomeStatus::FailedTerminal
        },
        status_code,
        error_kind: match (ok, status_code) {
            (true, _) => None,
            (false, Some(_)) => Some(ErrorKind::RetryableStatus),
            (false, None) => Some(ErrorKind::Timeout),
        },
        latency: Duration::from_millis(120),
        total_elapsed: Duration::from_millis(300),
        bytes_sent: 100,
        bytes_received: 2048,
        attempt_count: if ok { 1 } else { 4 },
        timestamp: SystemTime::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_sink() {
        let sink = InMemorySink::new();
        assert!(sink.is_empty());
        sink.record(sample_outcome(1, Some(200)));
        sink.record(sample_outcome(2, Some(503)));
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.outcomes()[1].intent_id(), 2);
        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_composite_fans_out() {
        let a = Arc::new(InMemorySink::new());
        let b = Arc::new(InMemorySink::new());
        let composite = CompositeSink::new()
            .add(a.clone())
            .add(b.clone())
            .add(Arc::new(LoggingSink))
            .add(noop_sink());

        composite.record(sample_outcome(9, Some(200)));
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(composite.dropped(), 0);
        assert_eq!(composite.export_errors(), 0);
    }
}
