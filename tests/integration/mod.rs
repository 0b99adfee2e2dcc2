//! Shared fixtures for integration tests

#![allow(dead_code)]

pub mod mock_server;
pub mod scripted;

use std::sync::Arc;

use proxy_loadgen::{Destination, TrafficIntent, Vendor, VendorPool, VendorRegistry};

/// Registry from `(vendor, pool, max_concurrency, weight)` rows.
pub fn registry(pools: &[(&str, &str, usize, f64)]) -> Arc<VendorRegistry> {
    let mut vendors: Vec<Vendor> = Vec::new();
    for &(vendor, pool, max, weight) in pools {
        let p = VendorPool::new(vendor, pool, max).with_weight(weight);
        match vendors.iter().position(|v| v.id() == vendor) {
            Some(i) => {
                let v = vendors.remove(i);
                vendors.insert(i, v.with_pool(p));
            }
            None => vendors.push(Vendor::new(vendor).with_pool(p)),
        }
    }
    Arc::new(VendorRegistry::new(vendors))
}

/// `n` GET intents targeting one pool.
pub fn intents(n: u64, vendor: &str, pool: &str) -> Vec<TrafficIntent> {
    let destination = Arc::new(Destination::new("http://target.test").unwrap());
    (0..n)
        .map(|id| TrafficIntent::new(id, destination.clone(), vendor, pool).with_path("/get"))
        .collect()
}

/// Push a pool's rolling window to all failures.
pub fn sicken(pool: &VendorPool) {
    for _ in 0..100 {
        pool.record_attempt(false);
    }
}
