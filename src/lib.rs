//! # proxy-loadgen
//!
//! 代理厂商合成流量生成器：按厂商与代理池归因每一次 HTTP 结果。
//!
//! Synthetic traffic generator that sends HTTP requests through proxy vendors
//! and attributes every outcome to the vendor and pool that carried it.
//!
//! ## Overview
//!
//! Each vendor owns one or more pools. A pool is a bounded connection budget
//! with its own rolling health. Traffic flows in one direction:
//!
//! ```text
//! RequestScheduler --TrafficIntent--> Dispatcher --Outcome--> MetricsSink
//!                                        |
//!                         VendorRegistry / VendorPool (slots, health)
//! ```
//!
//! - **Bounded**: a pool never has more than `max_concurrency` requests in flight
//! - **Exactly once**: every accepted intent yields one outcome, or one counted drop at shutdown
//! - **Health-aware**: schedulers down-weight and retries fail over away from unhealthy pools
//! - **Non-blocking sinks**: a slow metrics backend drops and counts instead of stalling dispatch
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use proxy_loadgen::{
//!     Dispatcher, HttpTransport, LoadgenConfig, RequestScheduler, VendorRegistry,
//! };
//!
//! #[tokio::main]
//! async fn main() -> proxy_loadgen::Result<()> {
//!     let cfg = LoadgenConfig::load_or_default("config/loadgen.yaml")?;
//!     let registry = Arc::new(VendorRegistry::from_config(&cfg));
//!     let transport = Arc::new(HttpTransport::from_registry(&registry, &cfg)?);
//!
//!     let dispatcher = Dispatcher::builder(registry.clone(), transport)
//!         .with_config(&cfg)
//!         .build();
//!     let scheduler = RequestScheduler::from_config(registry, &cfg)?;
//!
//!     let report = dispatcher.run(scheduler.take(1_000)).await;
//!     println!("{} succeeded", report.succeeded);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | YAML configuration, defaults and validation |
//! | [`vendor`] | Vendors, pools, slot handles and health |
//! | [`scheduler`] | Intent generation policies and pacing |
//! | [`dispatcher`] | Slot acquisition, attempts, retries and shutdown |
//! | [`transport`] | Network seam and the reqwest implementation |
//! | [`metrics`] | Outcome sinks and Prometheus export |
//! | [`server`] | `/metrics`, `/health` and `/stats` endpoints |
//! | [`types`] | Intents, destinations and outcomes |

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod scheduler;
pub mod server;
pub mod transport;
pub mod types;
pub mod vendor;

pub use config::{ConfigError, LoadgenConfig, SchedulingPolicy};
pub use dispatcher::{
    DispatchReport, Dispatcher, DispatcherBuilder, IntentState, RetryPolicy, VendorOverrides,
};
pub use error::{Error, ErrorContext};
pub use metrics::{
    BufferedSink, CompositeSink, InMemorySink, LoggingSink, MetricsSink, NoopSink,
    OutcomeExporter, PrometheusMetrics,
};
pub use scheduler::{RequestScheduler, TrafficSource};
pub use transport::{HttpTransport, Transport, TransportError, TransportRequest, TransportResponse};
pub use types::{Destination, ErrorKind, Outcome, OutcomeStatus, TrafficIntent};
pub use vendor::{Health, PoolError, SlotHandle, Vendor, VendorPool, VendorRegistry};

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
