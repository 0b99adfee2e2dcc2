use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::Proxy;
use tracing::{debug, trace};

use super::{Transport, TransportError, TransportRequest, TransportResponse};
use crate::config::LoadgenConfig;
use crate::vendor::VendorRegistry;

pub const HEADER_PROXY_VENDOR: &str = "x-proxy-vendor";
pub const HEADER_PROXY_POOL: &str = "x-proxy-pool";
pub const HEADER_REQUEST_ID: &str = "x-request-id";

/// reqwest-backed transport with one connection pool per proxy endpoint.
pub struct HttpTransport {
    timeout: Duration,
    max_idle_per_host: usize,
    direct: reqwest::Client,
    proxied: RwLock<HashMap<String, reqwest::Client>>,
    vendor_headers: HashMap<String, HeaderMap>,
    user_agent_prefix: String,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let max_idle_per_host = 32;
        Ok(Self {
            timeout,
            max_idle_per_host,
            direct: build_client(timeout, max_idle_per_host, None)?,
            proxied: RwLock::new(HashMap::new()),
            vendor_headers: HashMap::new(),
            user_agent_prefix: "Crawler".to_string(),
        })
    }

    /// One client per distinct pool proxy plus each vendor's auth headers.
    ///
    /// The client timeout is the longest any vendor allows; the dispatcher
    /// enforces each vendor's own limit.
    pub fn from_registry(registry: &VendorRegistry, cfg: &LoadgenConfig) -> Result<Self, TransportError> {
        let mut transport = Self::new(cfg.max_attempt_timeout())?
            .with_user_agent_prefix(&cfg.traffic.user_agent_prefix)
            .with_max_idle_per_host(registry.pools().map(|p| p.max_concurrency()).max().unwrap_or(32))?;

        for vendor in registry.vendors() {
            transport = transport.with_vendor_headers(vendor.id(), vendor.auth_headers())?;
            for pool in vendor.pools() {
                if let Some(proxy) = pool.proxy_url() {
                    transport.client_for(Some(proxy))?;
                }
            }
        }
        debug!(
            proxies = transport.proxied.read().map(|m| m.len()).unwrap_or(0),
            "http transport ready"
        );
        Ok(transport)
    }

    pub fn with_user_agent_prefix(mut self, prefix: &str) -> Self {
        self.user_agent_prefix = prefix.to_string();
        self
    }

    /// Idle connections kept per host. Rebuilds the direct client.
    pub fn with_max_idle_per_host(mut self, n: usize) -> Result<Self, TransportError> {
        self.max_idle_per_host = n.max(1);
        self.direct = build_client(self.timeout, self.max_idle_per_host, None)?;
        Ok(self)
    }

    pub fn with_vendor_headers(
        mut self,
        vendor_id: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<Self, TransportError> {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Setup(format!("header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Setup(format!("header value for '{}': {}", name, e)))?;
            map.insert(name, value);
        }
        self.vendor_headers.insert(vendor_id.to_string(), map);
        Ok(self)
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<reqwest::Client, TransportError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };

        if let Some(client) = self.proxied.read().ok().and_then(|m| m.get(proxy).cloned()) {
            return Ok(client);
        }

        let client = build_client(self.timeout, self.max_idle_per_host, Some(proxy))?;
        if let Ok(mut map) = self.proxied.write() {
            map.entry(proxy.to_string()).or_insert_with(|| client.clone());
        }
        Ok(client)
    }

    fn user_agent(&self, vendor_id: &str) -> String {
        let n: u16 = rand::thread_rng().gen_range(1000..10000);
        format!("{}-{}-{}", self.user_agent_prefix, vendor_id, n)
    }

    fn map_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout {
                after_ms: self.timeout.as_millis() as u64,
            }
        } else {
            TransportError::Connect(e.to_string())
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        let client = self.client_for(request.proxy_url.as_deref())?;
        let body = payload(request.payload_size);
        let bytes_sent = body.len() as u64;

        let mut req = client
            .request(request.method.clone(), &request.url)
            .header(HEADER_PROXY_VENDOR, &request.vendor_id)
            .header(HEADER_PROXY_POOL, &request.pool_id)
            .header(HEADER_REQUEST_ID, &request.request_id)
            .header(USER_AGENT, self.user_agent(&request.vendor_id));
        if let Some(extra) = &request.headers {
            req = req.headers(extra.as_ref().clone());
        }
        if let Some(headers) = self.vendor_headers.get(&request.vendor_id) {
            req = req.headers(headers.clone());
        }
        if !body.is_empty() {
            req = req.header(CONTENT_TYPE, "application/json").body(body);
        }

        let started = Instant::now();
        let resp = req.send().await.map_err(|e| self.map_error(e))?;
        let status_code = resp.status().as_u16();
        let received = resp.bytes().await.map_err(|e| self.map_error(e))?;
        let latency = started.elapsed();

        trace!(
            request_id = %request.request_id,
            vendor = %request.vendor_id,
            pool = %request.pool_id,
            status_code,
            latency_ms = latency.as_millis() as u64,
            "attempt completed"
        );

        Ok(TransportResponse {
            status_code,
            bytes_sent,
            bytes_received: received.len() as u64,
            latency,
        })
    }
}

fn build_client(
    timeout: Duration,
    max_idle_per_host: usize,
    proxy: Option<&str>,
) -> Result<reqwest::Client, TransportError> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(max_idle_per_host)
        .pool_idle_timeout(Some(Duration::from_secs(90)));

    builder = match proxy {
        Some(url) => builder.proxy(
            Proxy::all(url).map_err(|e| TransportError::Setup(format!("proxy '{}': {}", url, e)))?,
        ),
        // Ignore HTTP(S)_PROXY from the environment when a pool has no proxy.
        None => builder.no_proxy(),
    };

    builder
        .build()
        .map_err(|e| TransportError::Setup(e.to_string()))
}

/// JSON-shaped filler of exactly `size` bytes.
fn payload(size: usize) -> Bytes {
    const PREFIX: &[u8] = b"{\"data\":\"";
    const SUFFIX: &[u8] = b"\"}";
    if size == 0 {
        return Bytes::new();
    }

    let overhead = PREFIX.len() + SUFFIX.len();
    let fill = size.saturating_sub(overhead);
    let mut buf = Vec::with_capacity(size);
    if size > overhead {
        buf.extend_from_slice(PREFIX);
    }
    buf.extend(
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(if size > overhead { fill } else { size }),
    );
    if size > overhead {
        buf.extend_from_slice(SUFFIX);
    }
    Bytes::from(buf)
}
