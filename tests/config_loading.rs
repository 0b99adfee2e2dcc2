//! Loading the shipped configuration and its failure modes

use std::path::PathBuf;
use std::sync::Arc;

use proxy_loadgen::{ConfigError, LoadgenConfig, RequestScheduler, SchedulingPolicy, VendorRegistry};

fn shipped_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/loadgen.yaml")
}

fn temp_file(name: &str, content: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("proxy-loadgen-{}-{}.yaml", std::process::id(), name));
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_shipped_config_loads() {
    let cfg = LoadgenConfig::from_file(shipped_config()).unwrap();
    assert_eq!(cfg.vendors.len(), 3);
    assert_eq!(cfg.total_capacity(), 168);
    assert_eq!(cfg.scheduling.policy, SchedulingPolicy::WeightedRandom);

    let registry = Arc::new(VendorRegistry::from_config(&cfg));
    assert_eq!(registry.pools().count(), 9);
    assert_eq!(registry.total_capacity(), 168);

    let pool = registry.resolve("vendor-b", "residential-eu").unwrap();
    assert_eq!(pool.proxy_url(), Some("http://proxy-vendor-b.com:8080"));

    let scheduler = RequestScheduler::from_config(registry, &cfg).unwrap();
    let hosts: Vec<String> = scheduler
        .with_seed(11)
        .take(200)
        .map(|i| i.destination.host().to_string())
        .collect();
    assert!(hosts.iter().any(|h| h == "postman-echo.com"));

    let names: Vec<&str> = cfg.traffic_patterns.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["burst", "spike", "steady"]);
    assert_eq!(cfg.traffic_patterns["spike"].requests_per_second, Some(200.0));
    let vendor_c = cfg.vendors.iter().find(|v| v.id == "vendor-c").unwrap();
    assert_eq!(vendor_c.max_retries, Some(1));
    assert_eq!(vendor_c.attempt_timeout(), Some(std::time::Duration::from_secs(60)));
}

#[test]
fn test_missing_file_uses_builtin_layout() {
    let cfg = LoadgenConfig::load_or_default("does/not/exist.yaml").unwrap();
    assert_eq!(cfg.vendors.len(), 3);
    assert_eq!(cfg.destinations.len(), 3);
    assert_eq!(cfg.traffic.requests_per_second, Some(10.0));
}

#[test]
fn test_malformed_yaml_is_load_error() {
    let path = temp_file("malformed", "vendors: [\n  - id: broken\n    pools: {");
    let err = LoadgenConfig::load_or_default(&path).unwrap_err();
    let _ = std::fs::remove_file(&path);

    match err {
        ConfigError::LoadError { path: p, hint, .. } => {
            assert!(p.ends_with("malformed.yaml"));
            assert!(hint.is_some());
        }
        other => panic!("expected LoadError, got {:?}", other),
    }
}

#[test]
fn test_invalid_values_point_at_field() {
    let path = temp_file(
        "zero-capacity",
        r#"
vendors:
  - id: vendor-a
    pools:
      - id: dc
        max_concurrency: 0
destinations:
  - https://httpbin.org
"#,
    );
    let err = LoadgenConfig::from_file(&path).unwrap_err();
    let _ = std::fs::remove_file(&path);

    assert!(err.field().is_some_and(|f| f.contains("max_concurrency")), "{}", err);
}
