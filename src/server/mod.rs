//! 状态服务：Prometheus 指标、健康检查与运行统计。
//!
//! # Status Server
//!
//! | Route | Body |
//! |-------|------|
//! | `GET /metrics` | Prometheus text exposition |
//! | `GET /health` | [`HealthReport`] as JSON |
//! | `GET /stats` | [`StatsReport`] as JSON |

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::dispatcher::{DispatchReport, DispatchStats};
use crate::metrics::{MetricsSink, PrometheusMetrics};
use crate::vendor::{Health, PoolSnapshot, VendorRegistry};
use crate::{Error, ErrorContext, Result};

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<VendorRegistry>,
    pub stats: Arc<DispatchStats>,
    pub metrics: Arc<PrometheusMetrics>,
    pub sink: Arc<dyn MetricsSink>,
    pub started: Instant,
}

impl AppState {
    pub fn new(
        registry: Arc<VendorRegistry>,
        stats: Arc<DispatchStats>,
        metrics: Arc<PrometheusMetrics>,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            registry,
            stats,
            metrics,
            sink,
            started: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// `healthy` unless some vendor is unhealthy.
    pub status: Health,
    pub uptime_secs: u64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub vendors: BTreeMap<String, Health>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub uptime_secs: u64,
    pub dispatcher: DispatchReport,
    pub pools: Vec<PoolSnapshot>,
    pub sink_dropped: u64,
    pub sink_export_errors: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(addr: SocketAddr, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        Error::runtime_with_context(
            format!("failed to bind status server: {}", e),
            ErrorContext::new()
                .with_field_path("metrics.listen_addr")
                .with_details(addr.to_string())
                .with_source("status_server"),
        )
    })?;
    info!(address = %addr, "status server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("status server stopped");
    Ok(())
}

pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    state
        .metrics
        .refresh(&state.registry, &state.stats.snapshot(), state.sink.as_ref());
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, state.metrics.content_type())],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthReport> {
    let report = state.stats.snapshot();
    let vendors = state.registry.snapshot_health();
    let status = if vendors.values().any(|h| *h == Health::Unhealthy) {
        Health::Degraded
    } else {
        Health::Healthy
    };
    Json(HealthReport {
        status,
        uptime_secs: state.started.elapsed().as_secs(),
        total_requests: report.outcomes(),
        successful_requests: report.succeeded,
        failed_requests: report.failed_terminal,
        success_rate: report.success_rate(),
        vendors,
    })
}

pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsReport> {
    Json(StatsReport {
        uptime_secs: state.started.elapsed().as_secs(),
        dispatcher: state.stats.snapshot(),
        pools: state.registry.pool_snapshots(),
        sink_dropped: state.sink.dropped(),
        sink_export_errors: state.sink.export_errors(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{noop_sink, OutcomeExporter};
    use crate::vendor::{Vendor, VendorPool};
    use axum::body::to_bytes;
    use std::sync::atomic::Ordering;

    fn state() -> AppState {
        let registry = Arc::new(VendorRegistry::new([
            Vendor::new("vendor-a").with_pool(VendorPool::new("vendor-a", "dc-east", 2)),
            Vendor::new("vendor-b").with_pool(VendorPool::new("vendor-b", "resi-us", 1)),
        ]));
        AppState::new(
            registry,
            Arc::new(DispatchStats::default()),
            Arc::new(PrometheusMetrics::new().unwrap()),
            noop_sink(),
        )
    }

    #[tokio::test]
    async fn test_health_reports_vendor_state() {
        let state = state();
        state.stats.succeeded.store(3, Ordering::Relaxed);
        state.stats.failed_terminal.store(1, Ordering::Relaxed);

        let Json(health) = health_handler(State(state.clone())).await;
        assert_eq!(health.status, Health::Healthy);
        assert_eq!(health.total_requests, 4);
        assert_eq!(health.success_rate, 0.75);

        let pool = state.registry.resolve("vendor-b", "resi-us").unwrap();
        for _ in 0..100 {
            pool.record_attempt(false);
        }
        let Json(health) = health_handler(State(state)).await;
        assert_eq!(health.status, Health::Degraded);
        assert_eq!(health.vendors["vendor-b"], Health::Unhealthy);
    }

    #[tokio::test]
    async fn test_stats_lists_pools() {
        let Json(stats) = stats_handler(State(state())).await;
        assert_eq!(stats.pools.len(), 2);
        assert_eq!(stats.pools[0].vendor, "vendor-a");
        assert_eq!(stats.dispatcher, DispatchReport::default());
        assert_eq!(stats.sink_export_errors, 0);
    }

    #[tokio::test]
    async fn test_stats_surface_sink_export_errors() {
        struct Lossy;

        impl MetricsSink for Lossy {
            fn record(&self, _: crate::types::Outcome) {}

            fn dropped(&self) -> u64 {
                2
            }

            fn export_errors(&self) -> u64 {
                5
            }
        }

        let mut state = state();
        state.sink = Arc::new(Lossy);
        let Json(stats) = stats_handler(State(state.clone())).await;
        assert_eq!(stats.sink_dropped, 2);
        assert_eq!(stats.sink_export_errors, 5);

        let resp = metrics_handler(State(state)).await;
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("load_generator_sink_export_errors_total 5"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint_renders_text() {
        let state = state();
        state
            .metrics
            .export(&crate::metrics::sample_outcome(1, Some(200)))
            .await
            .unwrap();

        let resp = metrics_handler(State(state)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("load_generator_requests_total"));
        assert!(text.contains("proxy_pool_health"));
    }
}
