//! Prometheus export of outcomes, pool state and dispatcher counters.

use std::sync::atomic::{AtomicU64, Ordering};

use ::prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use async_trait::async_trait;

use super::{MetricsSink, OutcomeExporter};
use crate::dispatcher::DispatchReport;
use crate::types::Outcome;
use crate::vendor::VendorRegistry;
use crate::{Error, ErrorContext, Result};

/// Request duration buckets, in seconds.
pub const DURATION_BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 60.0];

/// Metric families backed by a private registry.
pub struct PrometheusMetrics {
    registry: Registry,
    requests: IntCounterVec,
    duration: HistogramVec,
    bytes_sent: IntCounterVec,
    bytes_received: IntCounterVec,
    errors: IntCounterVec,
    retries: IntCounterVec,
    pool_health: GaugeVec,
    pool_in_flight: IntGaugeVec,
    pool_error_rate: GaugeVec,
    vendor_health: GaugeVec,
    sink_dropped: IntCounter,
    shutdown_dropped: IntCounter,
    pool_exhausted: IntCounter,
    throttled: IntCounter,
    sink_export_errors: IntCounter,
    last_sink_dropped: AtomicU64,
    last_shutdown_dropped: AtomicU64,
    last_pool_exhausted: AtomicU64,
    last_throttled: AtomicU64,
    last_sink_export_errors: AtomicU64,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new(
                "load_generator_requests_total",
                "Finished intents by vendor, pool, method, final status code and outcome",
            ),
            &["vendor", "pool", "method", "status_code", "destination_host", "outcome"],
        )
        .map_err(prom_err)?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "load_generator_request_duration_seconds",
                "Latency of the final attempt of each intent",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["vendor", "pool", "method", "destination_host"],
        )
        .map_err(prom_err)?;
        let bytes_sent = IntCounterVec::new(
            Opts::new("load_generator_bytes_sent_total", "Request body bytes sent"),
            &["vendor", "pool", "destination_host"],
        )
        .map_err(prom_err)?;
        let bytes_received = IntCounterVec::new(
            Opts::new("load_generator_bytes_received_total", "Response body bytes received"),
            &["vendor", "pool", "destination_host"],
        )
        .map_err(prom_err)?;
        let errors = IntCounterVec::new(
            Opts::new("load_generator_errors_total", "Failed intents by final error kind"),
            &["vendor", "pool", "error_kind"],
        )
        .map_err(prom_err)?;
        let retries = IntCounterVec::new(
            Opts::new("load_generator_retries_total", "Network attempts beyond the first"),
            &["vendor", "pool"],
        )
        .map_err(prom_err)?;
        let pool_health = GaugeVec::new(
            Opts::new("proxy_pool_health", "Pool health (1 healthy, 0.5 degraded, 0 unhealthy)"),
            &["vendor", "pool"],
        )
        .map_err(prom_err)?;
        let pool_in_flight = IntGaugeVec::new(
            Opts::new("proxy_pool_in_flight", "Slots currently held per pool"),
            &["vendor", "pool"],
        )
        .map_err(prom_err)?;
        let pool_error_rate = GaugeVec::new(
            Opts::new("proxy_pool_error_rate", "Rolling error rate per pool"),
            &["vendor", "pool"],
        )
        .map_err(prom_err)?;
        let vendor_health = GaugeVec::new(
            Opts::new("proxy_vendor_health", "Worst pool health per vendor"),
            &["vendor"],
        )
        .map_err(prom_err)?;
        let sink_dropped = IntCounter::new(
            "load_generator_sink_dropped_total",
            "Outcomes dropped because the sink queue was full",
        )
        .map_err(prom_err)?;
        let shutdown_dropped = IntCounter::new(
            "load_generator_shutdown_dropped_total",
            "Intents discarded at shutdown before any attempt",
        )
        .map_err(prom_err)?;
        let pool_exhausted = IntCounter::new(
            "load_generator_pool_exhausted_total",
            "Slot acquisitions that timed out",
        )
        .map_err(prom_err)?;
        let throttled = IntCounter::new(
            "load_generator_vendor_throttled_total",
            "Attempts deferred by a vendor rate limit",
        )
        .map_err(prom_err)?;
        let sink_export_errors = IntCounter::new(
            "load_generator_sink_export_errors_total",
            "Outcome batches the exporter failed to accept",
        )
        .map_err(prom_err)?;

        registry.register(Box::new(requests.clone())).map_err(prom_err)?;
        registry.register(Box::new(duration.clone())).map_err(prom_err)?;
        registry.register(Box::new(bytes_sent.clone())).map_err(prom_err)?;
        registry.register(Box::new(bytes_received.clone())).map_err(prom_err)?;
        registry.register(Box::new(errors.clone())).map_err(prom_err)?;
        registry.register(Box::new(retries.clone())).map_err(prom_err)?;
        registry.register(Box::new(pool_health.clone())).map_err(prom_err)?;
        registry.register(Box::new(pool_in_flight.clone())).map_err(prom_err)?;
        registry.register(Box::new(pool_error_rate.clone())).map_err(prom_err)?;
        registry.register(Box::new(vendor_health.clone())).map_err(prom_err)?;
        registry.register(Box::new(sink_dropped.clone())).map_err(prom_err)?;
        registry.register(Box::new(shutdown_dropped.clone())).map_err(prom_err)?;
        registry.register(Box::new(pool_exhausted.clone())).map_err(prom_err)?;
        registry.register(Box::new(throttled.clone())).map_err(prom_err)?;
        registry.register(Box::new(sink_export_errors.clone())).map_err(prom_err)?;

        Ok(Self {
            registry,
            requests,
            duration,
            bytes_sent,
            bytes_received,
            errors,
            retries,
            pool_health,
            pool_in_flight,
            pool_error_rate,
            vendor_health,
            sink_dropped,
            shutdown_dropped,
            pool_exhausted,
            throttled,
            sink_export_errors,
            last_sink_dropped: AtomicU64::new(0),
            last_shutdown_dropped: AtomicU64::new(0),
            last_pool_exhausted: AtomicU64::new(0),
            last_throttled: AtomicU64::new(0),
            last_sink_export_errors: AtomicU64::new(0),
        })
    }

    /// Fold one outcome into the counters and histograms.
    pub fn observe(&self, o: &Outcome) {
        let status_code = o
            .status_code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "error".to_string());
        let (vendor, pool, host) = (o.vendor_id(), o.pool_id(), o.destination_host());

        self.requests
            .with_label_values(&[vendor, pool, o.method(), status_code.as_str(), host, o.status().as_str()])
            .inc();
        self.duration
            .with_label_values(&[vendor, pool, o.method(), host])
            .observe(o.latency().as_secs_f64());
        self.bytes_sent
            .with_label_values(&[vendor, pool, host])
            .inc_by(o.bytes_sent());
        self.bytes_received
            .with_label_values(&[vendor, pool, host])
            .inc_by(o.bytes_received());
        if let Some(kind) = o.error_kind() {
            self.errors.with_label_values(&[vendor, pool, kind.as_str()]).inc();
        }
        if o.attempt_count() > 1 {
            self.retries
                .with_label_values(&[vendor, pool])
                .inc_by(u64::from(o.attempt_count() - 1));
        }
    }

    /// Refresh gauges from live state. Called right before a scrape.
    pub fn refresh(&self, registry: &VendorRegistry, report: &DispatchReport, sink: &dyn MetricsSink) {
        for pool in registry.pools() {
            let labels = [pool.vendor_id(), pool.pool_id()];
            self.pool_health
                .with_label_values(&labels)
                .set(pool.health().as_gauge());
            self.pool_in_flight
                .with_label_values(&labels)
                .set(pool.current_in_flight() as i64);
            self.pool_error_rate
                .with_label_values(&labels)
                .set(pool.error_rate());
        }
        for (vendor, health) in registry.snapshot_health() {
            self.vendor_health
                .with_label_values(&[vendor.as_str()])
                .set(health.as_gauge());
        }

        advance(&self.sink_dropped, &self.last_sink_dropped, sink.dropped());
        advance(
            &self.sink_export_errors,
            &self.last_sink_export_errors,
            sink.export_errors(),
        );
        advance(&self.shutdown_dropped, &self.last_shutdown_dropped, report.shutdown_dropped);
        advance(&self.pool_exhausted, &self.last_pool_exhausted, report.pool_exhausted);
        advance(&self.throttled, &self.last_throttled, report.throttled);
    }

    /// Text exposition format.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(prom_err)?;
        String::from_utf8(buffer).map_err(|e| {
            Error::runtime_with_context(
                e.to_string(),
                ErrorContext::new().with_source("prometheus_encoder"),
            )
        })
    }

    pub fn content_type(&self) -> &'static str {
        ::prometheus::TEXT_FORMAT
    }
}

#[async_trait]
impl OutcomeExporter for PrometheusMetrics {
    async fn export(&self, outcome: &Outcome) -> Result<()> {
        self.observe(outcome);
        Ok(())
    }
}

/// Move a monotonic counter up to an externally tracked total.
fn advance(counter: &IntCounter, last: &AtomicU64, total: u64) {
    let prev = last.swap(total, Ordering::AcqRel);
    if total > prev {
        counter.inc_by(total - prev);
    }
}

fn prom_err(e: impl std::fmt::Display) -> Error {
    Error::runtime_with_context(e.to_string(), ErrorContext::new().with_source("prometheus"))
}
