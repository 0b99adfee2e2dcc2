//! Startup validation. Any failure here is fatal to the process.

use super::{ConfigError, LoadgenConfig};
use std::collections::BTreeSet;

const SUPPORTED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

pub fn validate(cfg: &LoadgenConfig) -> Result<(), ConfigError> {
    if cfg.vendors.is_empty() {
        return Err(ConfigError::invalid("vendors", "at least one vendor is required"));
    }

    let mut vendor_ids = BTreeSet::new();
    let mut total_weight = 0.0;
    for (vi, vendor) in cfg.vendors.iter().enumerate() {
        let field = format!("vendors[{}]", vi);
        if vendor.id.trim().is_empty() {
            return Err(ConfigError::invalid(format!("{}.id", field), "must not be empty"));
        }
        if !vendor_ids.insert(vendor.id.as_str()) {
            return Err(ConfigError::invalid(
                format!("{}.id", field),
                format!("duplicate vendor id '{}'", vendor.id),
            ));
        }
        if let Some(proxy) = &vendor.proxy_url {
            check_url(&format!("{}.proxy_url", field), proxy)?;
        }
        if vendor.attempt_timeout_ms == Some(0) {
            return Err(ConfigError::invalid(
                format!("{}.attempt_timeout_ms", field),
                "must be positive",
            ));
        }
        if let Some(rate) = vendor.rate_limit {
            check_rate(&format!("{}.rate_limit", field), rate)?;
        }
        if vendor.pools.is_empty() {
            return Err(ConfigError::invalid(
                format!("{}.pools", field),
                format!("vendor '{}' has no pools", vendor.id),
            ));
        }

        let mut pool_ids = BTreeSet::new();
        for (pi, pool) in vendor.pools.iter().enumerate() {
            let pfield = format!("{}.pools[{}]", field, pi);
            if pool.id.trim().is_empty() {
                return Err(ConfigError::invalid(format!("{}.id", pfield), "must not be empty"));
            }
            if !pool_ids.insert(pool.id.as_str()) {
                return Err(ConfigError::invalid(
                    format!("{}.id", pfield),
                    format!("duplicate pool id '{}' in vendor '{}'", pool.id, vendor.id),
                ));
            }
            if pool.max_concurrency == 0 {
                return Err(ConfigError::invalid(
                    format!("{}.max_concurrency", pfield),
                    "must be at least 1",
                ));
            }
            if !pool.weight.is_finite() || pool.weight < 0.0 {
                return Err(ConfigError::invalid(
                    format!("{}.weight", pfield),
                    format!("must be a finite non-negative number, got {}", pool.weight),
                ));
            }
            if let Some(proxy) = &pool.proxy_url {
                check_url(&format!("{}.proxy_url", pfield), proxy)?;
            }
            total_weight += pool.weight;
        }
    }
    if total_weight <= 0.0 {
        return Err(ConfigError::invalid("vendors", "all pool weights are zero")
            .with_hint("give at least one pool a positive weight"));
    }

    if cfg.destinations.is_empty() {
        return Err(ConfigError::invalid("destinations", "at least one destination is required"));
    }
    let mut dest_weight = 0.0;
    for (di, dest) in cfg.destinations.iter().enumerate() {
        let field = format!("destinations[{}]", di);
        let url = check_url(&format!("{}.url", field), &dest.url)?;
        if url.host_str().is_none() {
            return Err(ConfigError::invalid(format!("{}.url", field), "missing host"));
        }
        if !dest.weight.is_finite() || dest.weight < 0.0 {
            return Err(ConfigError::invalid(
                format!("{}.weight", field),
                format!("must be a finite non-negative number, got {}", dest.weight),
            ));
        }
        for (i, path) in dest.paths.iter().enumerate() {
            if !path.starts_with('/') {
                return Err(ConfigError::invalid(
                    format!("{}.paths[{}]", field, i),
                    format!("path '{}' must start with '/'", path),
                ));
            }
        }
        dest_weight += dest.weight;
    }
    if dest_weight <= 0.0 {
        return Err(ConfigError::invalid("destinations", "all destination weights are zero"));
    }

    let d = &cfg.dispatch;
    if d.attempt_timeout_ms == 0 {
        return Err(ConfigError::invalid("dispatch.attempt_timeout_ms", "must be positive"));
    }
    if d.base_delay_ms > d.max_backoff_ms {
        return Err(ConfigError::invalid(
            "dispatch.base_delay_ms",
            format!(
                "base delay {}ms exceeds max backoff {}ms",
                d.base_delay_ms, d.max_backoff_ms
            ),
        ));
    }
    if d.health_window == 0 {
        return Err(ConfigError::invalid("dispatch.health_window", "must be at least 1"));
    }
    if d.workers == Some(0) {
        return Err(ConfigError::invalid("dispatch.workers", "must be at least 1")
            .with_hint("omit the field to size workers from pool capacity"));
    }
    if d.max_outstanding == Some(0) {
        return Err(ConfigError::invalid("dispatch.max_outstanding", "must be at least 1"));
    }
    if d.success_statuses.0.is_empty() {
        return Err(ConfigError::invalid("dispatch.success_statuses", "must not be empty"));
    }

    let t = &cfg.traffic;
    if t.methods.is_empty() {
        return Err(ConfigError::invalid("traffic.methods", "at least one method is required"));
    }
    check_methods("traffic.methods", &t.methods)?;
    if let Some(rps) = t.requests_per_second {
        check_rate("traffic.requests_per_second", rps)?;
    }

    for (name, pattern) in &cfg.traffic_patterns {
        let field = format!("traffic_patterns.{}", name);
        if let Some(rps) = pattern.requests_per_second {
            check_rate(&format!("{}.requests_per_second", field), rps)?;
        }
        check_methods(&format!("{}.methods", field), &pattern.methods)?;
        for (key, value) in &pattern.headers {
            let valid = reqwest::header::HeaderName::from_bytes(key.as_bytes()).is_ok()
                && reqwest::header::HeaderValue::from_str(value).is_ok();
            if !valid {
                return Err(ConfigError::invalid(
                    format!("{}.headers.{}", field, key),
                    "not a valid HTTP header",
                ));
            }
        }
    }

    if cfg.metrics.sink_queue_capacity == 0 {
        return Err(ConfigError::invalid("metrics.sink_queue_capacity", "must be at least 1"));
    }
    if cfg.metrics.listen_addr.parse::<std::net::SocketAddr>().is_err() {
        return Err(ConfigError::invalid(
            "metrics.listen_addr",
            format!("'{}' is not a socket address", cfg.metrics.listen_addr),
        ));
    }

    Ok(())
}

fn check_methods(field: &str, methods: &[String]) -> Result<(), ConfigError> {
    for (i, m) in methods.iter().enumerate() {
        if !SUPPORTED_METHODS.contains(&m.to_ascii_uppercase().as_str()) {
            return Err(ConfigError::invalid(
                format!("{}[{}]", field, i),
                format!("unsupported method '{}'", m),
            ));
        }
    }
    Ok(())
}

fn check_rate(field: &str, rate: f64) -> Result<(), ConfigError> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(ConfigError::invalid(
            field,
            format!("must be a positive number, got {}", rate),
        ));
    }
    Ok(())
}

fn check_url(field: &str, raw: &str) -> Result<url::Url, ConfigError> {
    url::Url::parse(raw)
        .map_err(|e| ConfigError::invalid(field, format!("invalid URL '{}': {}", raw, e)))
}
