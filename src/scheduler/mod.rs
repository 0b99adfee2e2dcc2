//! 请求调度器：按策略为每个流量意图选择厂商、代理池与目的地。
//!
//! # Request Scheduler
//!
//! [`RequestScheduler`] is an unbounded, seedable source of [`TrafficIntent`]s.
//! Each intent carries a suggested `(vendor, pool)` chosen by one of three
//! policies:
//!
//! | Policy | Behavior |
//! |--------|----------|
//! | `fixed_weights` | Weighted random over static pool weights; health is ignored |
//! | `round_robin` | Cycles pools in `(vendor, pool)` order, skipping unhealthy pools |
//! | `weighted_random` | Static weight scaled by health (1 / 0.5 / 0) |
//!
//! When every adjusted weight is zero, selection falls back to static weights so
//! traffic never stops. Candidates are kept in lexical `(vendor_id, pool_id)`
//! order, which makes a seeded run reproducible.
//!
//! The scheduler is an [`Iterator`]; [`RequestScheduler::into_stream`] adapts it
//! for async consumers. [`pacing::RateLimiter`] bounds how fast the dispatcher
//! pulls from it. Named traffic patterns become one [`TrafficSource`] each via
//! [`pattern_sources`], sharing a single intent id space.

pub mod pacing;
pub mod source;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::Stream;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use tracing::debug;

use crate::config::{ConfigError, DestinationPolicy, LoadgenConfig, SchedulingPolicy, TrafficPatternConfig};
use crate::types::{Destination, TrafficIntent};
use crate::vendor::{Health, VendorPool, VendorRegistry};

pub use pacing::{RateLimiter, RateLimiterConfig};
pub use source::{pattern_sources, BoxedSource, TrafficSource};

/// Methods that carry a generated body.
const BODY_METHODS: [Method; 3] = [Method::POST, Method::PUT, Method::PATCH];

pub struct RequestScheduler {
    registry: Arc<VendorRegistry>,
    policy: SchedulingPolicy,
    destination_policy: DestinationPolicy,
    candidates: Vec<Arc<VendorPool>>,
    destinations: Vec<Arc<Destination>>,
    methods: Vec<Method>,
    payload_sizes: Vec<usize>,
    headers: Option<Arc<HeaderMap>>,
    rng: StdRng,
    cursor: usize,
    ids: Arc<AtomicU64>,
}

impl RequestScheduler {
    /// Build a scheduler over every pool in `registry`.
    ///
    /// Fails when there is nothing to schedule onto.
    pub fn new(
        registry: Arc<VendorRegistry>,
        destinations: Vec<Destination>,
        policy: SchedulingPolicy,
    ) -> Result<Self, ConfigError> {
        let candidates: Vec<_> = registry.pools().cloned().collect();
        if candidates.is_empty() {
            return Err(ConfigError::invalid("vendors", "registry has no pools to schedule"));
        }
        if destinations.is_empty() {
            return Err(ConfigError::invalid("destinations", "at least one destination is required"));
        }

        Ok(Self {
            registry,
            policy,
            destination_policy: DestinationPolicy::Uniform,
            candidates,
            destinations: destinations.into_iter().map(Arc::new).collect(),
            methods: vec![Method::GET],
            payload_sizes: Vec::new(),
            headers: None,
            rng: StdRng::from_entropy(),
            cursor: 0,
            ids: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn from_config(registry: Arc<VendorRegistry>, cfg: &LoadgenConfig) -> Result<Self, ConfigError> {
        let destinations = cfg
            .destinations
            .iter()
            .map(Destination::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        let methods = parse_methods("traffic.methods", &cfg.traffic.methods)?;

        let mut scheduler = Self::new(registry, destinations, cfg.scheduling.policy)?
            .with_destination_policy(cfg.scheduling.destination_policy)
            .with_methods(methods)
            .with_payload_sizes(cfg.traffic.payload_sizes.clone());
        if let Some(seed) = cfg.scheduling.seed {
            scheduler = scheduler.with_seed(seed);
        }
        Ok(scheduler)
    }

    /// Scheduler for one named pattern. Empty pattern lists keep the `traffic` defaults.
    pub fn for_pattern(
        registry: Arc<VendorRegistry>,
        cfg: &LoadgenConfig,
        name: &str,
        pattern: &TrafficPatternConfig,
    ) -> Result<Self, ConfigError> {
        let field = format!("traffic_patterns.{}", name);
        let mut scheduler = Self::from_config(registry, cfg)?
            .with_methods(parse_methods(&format!("{}.methods", field), &pattern.methods)?);
        if !pattern.payload_sizes.is_empty() {
            scheduler = scheduler.with_payload_sizes(pattern.payload_sizes.clone());
        }
        if !pattern.headers.is_empty() {
            scheduler = scheduler.with_headers(header_map(&format!("{}.headers", field), &pattern.headers)?);
        }
        Ok(scheduler)
    }

    /// Make the sequence reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_destination_policy(mut self, policy: DestinationPolicy) -> Self {
        self.destination_policy = policy;
        self
    }

    pub fn with_methods(mut self, methods: Vec<Method>) -> Self {
        if !methods.is_empty() {
            self.methods = methods;
        }
        self
    }

    pub fn with_payload_sizes(mut self, sizes: Vec<usize>) -> Self {
        self.payload_sizes = sizes;
        self
    }

    /// Headers attached to every generated intent.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = (!headers.is_empty()).then(|| Arc::new(headers));
        self
    }

    /// Draw intent ids from `ids`, so several schedulers never hand out the same id.
    pub fn with_shared_ids(mut self, ids: Arc<AtomicU64>) -> Self {
        self.ids = ids;
        self
    }

    pub fn policy(&self) -> SchedulingPolicy {
        self.policy
    }

    pub fn registry(&self) -> &Arc<VendorRegistry> {
        &self.registry
    }

    /// Pick the next `(vendor, pool)` according to the policy.
    pub fn select_pool(&mut self) -> Arc<VendorPool> {
        let idx = match self.policy {
            SchedulingPolicy::FixedWeights => self.pick_weighted(|p| p.weight()),
            SchedulingPolicy::WeightedRandom => self.pick_weighted(|p| p.weight() * p.health().weight_factor()),
            SchedulingPolicy::RoundRobin => self.pick_round_robin(),
        };
        self.candidates[idx].clone()
    }

    /// Produce the next intent.
    pub fn next_intent(&mut self) -> TrafficIntent {
        let pool = self.select_pool();
        let destination = self.pick_destination();
        let path = if destination.paths().is_empty() {
            "/".to_string()
        } else {
            let i = self.rng.gen_range(0..destination.paths().len());
            destination.paths()[i].clone()
        };
        let method = self.methods[self.rng.gen_range(0..self.methods.len())].clone();
        let payload_size = if BODY_METHODS.contains(&method) && !self.payload_sizes.is_empty() {
            self.payload_sizes[self.rng.gen_range(0..self.payload_sizes.len())]
        } else {
            0
        };

        let id = self.ids.fetch_add(1, Ordering::Relaxed);
        let intent = TrafficIntent::new(id, destination, pool.vendor_id(), pool.pool_id())
            .with_path(path)
            .with_method(method)
            .with_payload_size(payload_size);
        match &self.headers {
            Some(headers) => intent.with_headers(headers.clone()),
            None => intent,
        }
    }

    /// Adapt the scheduler into an async stream of intents.
    pub fn into_stream(self) -> impl Stream<Item = TrafficIntent> {
        futures::stream::iter(self)
    }

    fn pick_destination(&mut self) -> Arc<Destination> {
        let idx = match self.destination_policy {
            DestinationPolicy::Uniform => self.rng.gen_range(0..self.destinations.len()),
            DestinationPolicy::Weighted => {
                let weights: Vec<f64> = self.destinations.iter().map(|d| d.weight().max(0.0)).collect();
                weighted_index(&mut self.rng, &weights).unwrap_or(0)
            }
        };
        self.destinations[idx].clone()
    }

    fn pick_weighted(&mut self, weight_of: impl Fn(&VendorPool) -> f64) -> usize {
        let adjusted: Vec<f64> = self.candidates.iter().map(|p| weight_of(p.as_ref()).max(0.0)).collect();
        if let Some(idx) = weighted_index(&mut self.rng, &adjusted) {
            return idx;
        }

        debug!("all adjusted pool weights are zero, falling back to static weights");
        let fallback: Vec<f64> = self.candidates.iter().map(|p| p.weight().max(0.0)).collect();
        weighted_index(&mut self.rng, &fallback).unwrap_or(0)
    }

    fn pick_round_robin(&mut self) -> usize {
        let n = self.candidates.len();
        let start = self.cursor;
        let usable = |p: &VendorPool| p.weight() > 0.0 && p.health() != Health::Unhealthy;

        let idx = (0..n)
            .map(|offset| (start + offset) % n)
            .find(|&i| usable(self.candidates[i].as_ref()))
            .or_else(|| {
                (0..n)
                    .map(|offset| (start + offset) % n)
                    .find(|&i| self.candidates[i].weight() > 0.0)
            })
            .unwrap_or(start % n);
        self.cursor = (idx + 1) % n;
        idx
    }
}

impl Iterator for RequestScheduler {
    type Item = TrafficIntent;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_intent())
    }
}

fn parse_methods(field: &str, methods: &[String]) -> Result<Vec<Method>, ConfigError> {
    methods
        .iter()
        .map(|m| {
            Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                .map_err(|_| ConfigError::invalid(field, format!("'{}' is not an HTTP method", m)))
        })
        .collect()
}

fn header_map(field: &str, headers: &BTreeMap<String, String>) -> Result<HeaderMap, ConfigError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let key = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ConfigError::invalid(format!("{}.{}", field, name), e.to_string()))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ConfigError::invalid(format!("{}.{}", field, name), e.to_string()))?;
        map.insert(key, value);
    }
    Ok(map)
}

/// Draw an index proportionally to `weights`. `None` when every weight is zero.
fn weighted_index(rng: &mut StdRng, weights: &[f64]) -> Option<usize> {
    let total: f64 = weights.iter().filter(|w| w.is_finite()).sum();
    if total <= 0.0 {
        return None;
    }

    let mut target = rng.gen::<f64>() * total;
    let mut last_positive = None;
    for (i, &w) in weights.iter().enumerate() {
        if w <= 0.0 || !w.is_finite() {
            continue;
        }
        if target < w {
            return Some(i);
        }
        target -= w;
        last_positive = Some(i);
    }
    // Float rounding can leave a sliver past the last bucket.
    last_positive
}
