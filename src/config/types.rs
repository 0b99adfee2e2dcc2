//! Configuration structures
//!
//! Everything here is deserialized once at startup and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadgenConfig {
    pub vendors: Vec<VendorConfig>,
    pub destinations: Vec<DestinationConfig>,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub traffic: TrafficConfig,
    /// Named traffic shapes selectable at run time; several may run side by side.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub traffic_patterns: BTreeMap<String, TrafficPatternConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// One proxy vendor and its pools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorConfig {
    pub id: String,
    /// Proxy endpoint shared by all pools unless a pool overrides it.
    /// `None` sends traffic directly (useful against local test servers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub auth_headers: BTreeMap<String, String>,
    /// Per-attempt timeout for this vendor; `dispatch.attempt_timeout_ms` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_timeout_ms: Option<u64>,
    /// Retry budget for this vendor; `dispatch.max_retries` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Attempts per second across all of this vendor's pools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<f64>,
    pub pools: Vec<PoolConfig>,
}

impl VendorConfig {
    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub id: String,
    pub max_concurrency: usize,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
}

/// A traffic destination.
#[derive(Debug, Clone, Serialize)]
pub struct DestinationConfig {
    pub url: String,
    pub weight: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
}

impl<'de> Deserialize<'de> for DestinationConfig {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Input {
            // Shorthand: - "https://httpbin.org"
            Url(String),
            Obj {
                url: String,
                #[serde(default = "default_weight")]
                weight: f64,
                #[serde(default)]
                paths: Vec<String>,
            },
        }

        match Input::deserialize(deserializer)? {
            Input::Url(url) => Ok(DestinationConfig {
                url,
                weight: default_weight(),
                paths: Vec::new(),
            }),
            Input::Obj { url, weight, paths } => Ok(DestinationConfig { url, weight, paths }),
        }
    }
}

fn default_weight() -> f64 {
    1.0
}

/// How the scheduler assigns vendor/pool pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingPolicy {
    #[serde(alias = "fixed-weights")]
    FixedWeights,
    #[serde(alias = "round-robin")]
    RoundRobin,
    #[serde(alias = "weighted-random")]
    WeightedRandom,
}

/// How the scheduler picks destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationPolicy {
    Uniform,
    Weighted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    #[serde(default = "default_policy")]
    pub policy: SchedulingPolicy,
    #[serde(default = "default_destination_policy")]
    pub destination_policy: DestinationPolicy,
    /// Fixed RNG seed for reproducible runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

fn default_policy() -> SchedulingPolicy {
    SchedulingPolicy::WeightedRandom
}

fn default_destination_policy() -> DestinationPolicy {
    DestinationPolicy::Uniform
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            policy: default_policy(),
            destination_policy: default_destination_policy(),
            seed: None,
        }
    }
}

/// A single entry of a status set: either an exact code or a class like `5xx`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusMatcher {
    Exact(u16),
    Class(u16),
}

impl StatusMatcher {
    pub fn matches(&self, status: u16) -> bool {
        match *self {
            StatusMatcher::Exact(code) => code == status,
            StatusMatcher::Class(class) => status / 100 == class,
        }
    }
}

impl Serialize for StatusMatcher {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match *self {
            StatusMatcher::Exact(code) => serializer.serialize_u16(code),
            StatusMatcher::Class(class) => serializer.serialize_str(&format!("{}xx", class)),
        }
    }
}

impl<'de> Deserialize<'de> for StatusMatcher {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Input {
            Code(u16),
            Class(String),
        }

        match Input::deserialize(deserializer)? {
            Input::Code(code) => Ok(StatusMatcher::Exact(code)),
            Input::Class(s) => {
                let s = s.trim().to_ascii_lowercase();
                if let Ok(code) = s.parse::<u16>() {
                    return Ok(StatusMatcher::Exact(code));
                }
                match s.strip_suffix("xx").and_then(|d| d.parse::<u16>().ok()) {
                    Some(class) if (1..=5).contains(&class) => Ok(StatusMatcher::Class(class)),
                    _ => Err(serde::de::Error::custom(format!(
                        "invalid status matcher '{}', expected a code or a class like '5xx'",
                        s
                    ))),
                }
            }
        }
    }
}

/// A set of HTTP status codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusSet(pub Vec<StatusMatcher>);

impl StatusSet {
    pub fn contains(&self, status: u16) -> bool {
        self.0.iter().any(|m| m.matches(status))
    }

    pub fn default_success() -> Self {
        StatusSet(vec![StatusMatcher::Class(2), StatusMatcher::Class(3)])
    }

    pub fn default_retryable() -> Self {
        StatusSet(vec![StatusMatcher::Exact(429), StatusMatcher::Class(5)])
    }
}

/// Dispatcher timing and retry knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    #[serde(default = "default_pool_acquire_timeout_ms")]
    pub pool_acquire_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Worker count; defaults to the sum of all pools' `max_concurrency`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(default = "StatusSet::default_success")]
    pub success_statuses: StatusSet,
    #[serde(default = "StatusSet::default_retryable")]
    pub retryable_statuses: StatusSet,
    #[serde(default = "default_true")]
    pub retry_on_timeout: bool,
    #[serde(default = "default_true")]
    pub retry_on_connect_error: bool,
    /// Number of attempts in each pool's rolling error window.
    #[serde(default = "default_health_window")]
    pub health_window: usize,
    /// Attempts a pool must see before its health can leave `Healthy`.
    #[serde(default = "default_health_min_samples")]
    pub health_min_samples: usize,
    /// Intents admitted but not yet finalized; defaults to twice the worker count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_outstanding: Option<usize>,
    /// Pool-exhaustion requeues an intent may take before it fails with `pool_exhausted`.
    #[serde(default = "default_max_exhausted_requeues")]
    pub max_exhausted_requeues: u32,
}

fn default_attempt_timeout_ms() -> u64 {
    10_000
}
fn default_pool_acquire_timeout_ms() -> u64 {
    1_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    100
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_health_window() -> usize {
    100
}
fn default_health_min_samples() -> usize {
    10
}
fn default_max_exhausted_requeues() -> u32 {
    20
}
fn default_true() -> bool {
    true
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: default_attempt_timeout_ms(),
            pool_acquire_timeout_ms: default_pool_acquire_timeout_ms(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            workers: None,
            success_statuses: StatusSet::default_success(),
            retryable_statuses: StatusSet::default_retryable(),
            retry_on_timeout: true,
            retry_on_connect_error: true,
            health_window: default_health_window(),
            health_min_samples: default_health_min_samples(),
            max_outstanding: None,
            max_exhausted_requeues: default_max_exhausted_requeues(),
        }
    }
}

impl DispatchConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn pool_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_acquire_timeout_ms)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Admission bound for a dispatcher running `workers` workers.
    pub fn outstanding_limit(&self, workers: usize) -> usize {
        self.max_outstanding
            .unwrap_or_else(|| workers.saturating_mul(2))
            .max(1)
    }
}

/// Shape of the generated requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficConfig {
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
    /// Body sizes (bytes) drawn for POST/PUT/PATCH requests.
    #[serde(default = "default_payload_sizes")]
    pub payload_sizes: Vec<usize>,
    /// Upper bound on intents fed per second; unlimited when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_second: Option<f64>,
    /// Stop feeding new intents after this many seconds; run until signalled when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
    #[serde(default = "default_user_agent_prefix")]
    pub user_agent_prefix: String,
}

fn default_methods() -> Vec<String> {
    vec!["GET".to_string()]
}
fn default_payload_sizes() -> Vec<usize> {
    vec![100, 500, 1000]
}
fn default_user_agent_prefix() -> String {
    "Crawler".to_string()
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            methods: default_methods(),
            payload_sizes: default_payload_sizes(),
            requests_per_second: None,
            duration_secs: None,
            user_agent_prefix: default_user_agent_prefix(),
        }
    }
}

/// A named traffic shape. Empty lists inherit from `traffic`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrafficPatternConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_second: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload_sizes: Vec<usize>,
    /// Extra headers sent with every request of this pattern.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl TrafficPatternConfig {
    pub fn duration(&self) -> Option<Duration> {
        self.duration_secs.map(Duration::from_secs)
    }
}

/// Metrics export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Bounded queue between workers and the exporter; oldest entries drop on overflow.
    #[serde(default = "default_sink_queue_capacity")]
    pub sink_queue_capacity: usize,
    /// Log every outcome at debug level in addition to exporting it.
    #[serde(default)]
    pub log_outcomes: bool,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_sink_queue_capacity() -> usize {
    10_000
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            sink_queue_capacity: default_sink_queue_capacity(),
            log_outcomes: false,
        }
    }
}

impl LoadgenConfig {
    /// Built-in three-vendor layout used when no configuration file is present.
    pub fn builtin() -> Self {
        let pools = |ids: &[&str], max: usize| -> Vec<PoolConfig> {
            ids.iter()
                .map(|id| PoolConfig {
                    id: id.to_string(),
                    max_concurrency: max,
                    weight: 1.0,
                    proxy_url: None,
                })
                .collect()
        };
        let auth = |k: &str, v: &str| {
            let mut m = BTreeMap::new();
            m.insert(k.to_string(), v.to_string());
            m
        };
        let pattern = |rps: f64, secs: u64, methods: &[&str], sizes: &[usize]| TrafficPatternConfig {
            requests_per_second: Some(rps),
            duration_secs: Some(secs),
            methods: methods.iter().map(|m| m.to_string()).collect(),
            payload_sizes: sizes.to_vec(),
            headers: BTreeMap::new(),
        };
        let mut traffic_patterns = BTreeMap::new();
        traffic_patterns.insert(
            "burst".to_string(),
            pattern(50.0, 300, &["GET", "POST"], &[100, 500, 1000, 5000]),
        );
        traffic_patterns.insert("steady".to_string(), pattern(10.0, 3600, &["GET"], &[100, 200]));
        traffic_patterns.insert(
            "spike".to_string(),
            pattern(200.0, 60, &["GET", "POST", "PUT"], &[50, 100, 500, 1000, 10_000]),
        );

        Self {
            vendors: vec![
                VendorConfig {
                    id: "vendor-a".to_string(),
                    proxy_url: Some("http://proxy-vendor-a.com:8080".to_string()),
                    auth_headers: auth("X-API-Key", "vendor-a-key"),
                    attempt_timeout_ms: Some(30_000),
                    max_retries: Some(3),
                    rate_limit: Some(1000.0),
                    pools: pools(
                        &["datacenter-eu", "datacenter-us-east", "datacenter-us-west"],
                        32,
                    ),
                },
                VendorConfig {
                    id: "vendor-b".to_string(),
                    proxy_url: Some("http://proxy-vendor-b.com:8080".to_string()),
                    auth_headers: auth("Authorization", "Bearer vendor-b-token"),
                    attempt_timeout_ms: Some(45_000),
                    max_retries: Some(2),
                    rate_limit: Some(500.0),
                    pools: pools(&["residential-asia", "residential-eu", "residential-us"], 16),
                },
                VendorConfig {
                    id: "vendor-c".to_string(),
                    proxy_url: Some("http://proxy-vendor-c.com:8080".to_string()),
                    auth_headers: auth("X-Auth-Token", "vendor-c-token"),
                    attempt_timeout_ms: Some(60_000),
                    max_retries: Some(1),
                    rate_limit: Some(300.0),
                    pools: pools(&["mobile-eu", "mobile-global", "mobile-us"], 8),
                },
            ],
            destinations: vec![
                DestinationConfig {
                    url: "https://httpbin.org".to_string(),
                    weight: 1.0,
                    paths: vec!["/get".into(), "/status/200".into(), "/delay/1".into()],
                },
                DestinationConfig {
                    url: "https://jsonplaceholder.typicode.com".to_string(),
                    weight: 1.0,
                    paths: vec!["/posts".into(), "/users".into(), "/comments".into()],
                },
                DestinationConfig {
                    url: "https://postman-echo.com".to_string(),
                    weight: 1.0,
                    paths: vec!["/get".into(), "/status/200".into()],
                },
            ],
            scheduling: SchedulingConfig::default(),
            dispatch: DispatchConfig::default(),
            traffic: TrafficConfig {
                requests_per_second: Some(10.0),
                ..TrafficConfig::default()
            },
            traffic_patterns,
            metrics: MetricsConfig::default(),
        }
    }

    /// Longest per-attempt timeout any vendor may use.
    pub fn max_attempt_timeout(&self) -> Duration {
        self.vendors
            .iter()
            .filter_map(VendorConfig::attempt_timeout)
            .fold(self.dispatch.attempt_timeout(), Duration::max)
    }

    /// Sum of every pool's connection budget.
    pub fn total_capacity(&self) -> usize {
        self.vendors
            .iter()
            .flat_map(|v| v.pools.iter())
            .map(|p| p.max_concurrency)
            .sum()
    }
}

impl Default for LoadgenConfig {
    fn default() -> Self {
        Self::builtin()
    }
}
