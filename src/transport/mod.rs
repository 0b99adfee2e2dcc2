//! 传输层：通过厂商代理发送单次请求。
//!
//! # Transport
//!
//! The dispatcher talks to the network only through the [`Transport`] trait, so
//! tests can swap in scripted transports. [`HttpTransport`] is the reqwest-backed
//! implementation that routes each request through its pool's proxy.

pub mod http;

use std::time::Duration;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Method;

use crate::types::TrafficIntent;
use crate::vendor::VendorPool;

pub use http::HttpTransport;

/// One network attempt, already bound to a pool.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// Unique per attempt, sent as `X-Request-ID`.
    pub request_id: String,
    pub intent_id: u64,
    pub method: Method,
    pub url: String,
    pub vendor_id: String,
    pub pool_id: String,
    /// Proxy endpoint for the pool; `None` sends directly.
    pub proxy_url: Option<String>,
    pub payload_size: usize,
    /// Pattern headers; vendor auth headers are applied on top.
    pub headers: Option<Arc<HeaderMap>>,
    /// 0-based network attempt number.
    pub attempt: u32,
}

impl TransportRequest {
    pub fn for_attempt(intent: &TrafficIntent, pool: &VendorPool, attempt: u32) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            intent_id: intent.id,
            method: intent.method.clone(),
            url: intent.url(),
            vendor_id: pool.vendor_id().to_string(),
            pool_id: pool.pool_id().to_string(),
            proxy_url: pool.proxy_url().map(str::to_string),
            payload_size: intent.payload_size_hint,
            headers: intent.headers.clone(),
            attempt,
        }
    }
}

/// What came back from one attempt. Any HTTP status counts as a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportResponse {
    pub status_code: u16,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub latency: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection, proxy, TLS or body-read failure.
    #[error("connect error: {0}")]
    Connect(String),

    #[error("request timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// Client construction failed; surfaces at startup only.
    #[error("transport setup failed: {0}")]
    Setup(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError>;
}
