//! Traffic intents and the destinations they target.

use std::sync::Arc;

use reqwest::header::HeaderMap;
use reqwest::Method;

use crate::config::{ConfigError, DestinationConfig};

/// A resolved traffic destination.
#[derive(Debug, Clone, PartialEq)]
pub struct Destination {
    base_url: String,
    host: String,
    weight: f64,
    paths: Vec<String>,
}

impl Destination {
    pub fn new(url: &str) -> Result<Self, ConfigError> {
        let parsed = url::Url::parse(url).map_err(|e| {
            ConfigError::invalid("destinations.url", format!("'{}': {}", url, e))
        })?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ConfigError::invalid("destinations.url", format!("'{}' has no host", url)))?
            .to_string();
        Ok(Self {
            base_url: url.trim_end_matches('/').to_string(),
            host,
            weight: 1.0,
            paths: Vec::new(),
        })
    }

    pub fn from_config(cfg: &DestinationConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(&cfg.url)?
            .with_weight(cfg.weight)
            .with_paths(cfg.paths.clone()))
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_paths(mut self, paths: Vec<String>) -> Self {
        self.paths = paths;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Absolute URL for `path`. Base path prefixes are preserved.
    pub fn url_for(&self, path: &str) -> String {
        if path.is_empty() || path == "/" {
            format!("{}/", self.base_url)
        } else {
            format!("{}{}", self.base_url, path)
        }
    }
}

/// One logical request the generator wants to send.
///
/// The suggested `(vendor, pool)` is a hint: the dispatcher resolves it and may
/// fail over to a sibling pool of the same vendor on retry.
#[derive(Debug, Clone)]
pub struct TrafficIntent {
    pub id: u64,
    pub destination: Arc<Destination>,
    pub path: String,
    pub suggested_vendor: String,
    pub suggested_pool: String,
    pub method: Method,
    pub payload_size_hint: usize,
    /// Extra headers from the traffic pattern that produced this intent.
    pub headers: Option<Arc<HeaderMap>>,
    /// Always 0 at creation; attempts are tracked by the dispatcher.
    pub attempt: u32,
}

impl TrafficIntent {
    pub fn new(
        id: u64,
        destination: Arc<Destination>,
        vendor: impl Into<String>,
        pool: impl Into<String>,
    ) -> Self {
        Self {
            id,
            destination,
            path: "/".to_string(),
            suggested_vendor: vendor.into(),
            suggested_pool: pool.into(),
            method: Method::GET,
            payload_size_hint: 0,
            headers: None,
            attempt: 0,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_payload_size(mut self, size: usize) -> Self {
        self.payload_size_hint = size;
        self
    }

    pub fn with_headers(mut self, headers: Arc<HeaderMap>) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn url(&self) -> String {
        self.destination.url_for(&self.path)
    }
}
