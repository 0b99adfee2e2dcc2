//! Mock HTTP destination for transport tests

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use mockito::{Matcher, Mock, Server, ServerGuard};
use proxy_loadgen::{Destination, HttpTransport, TrafficIntent};
use tokio::sync::Mutex;

/// Test fixture that manages a mock destination server
pub struct MockServerFixture {
    pub server: Arc<Mutex<ServerGuard>>,
    pub base_url: String,
}

impl MockServerFixture {
    pub async fn new() -> Self {
        let server = Server::new_async().await;
        let base_url = server.url();
        Self {
            server: Arc::new(Mutex::new(server)),
            base_url,
        }
    }

    pub fn destination(&self) -> Arc<Destination> {
        Arc::new(Destination::new(&self.base_url).unwrap())
    }

    pub fn intent(&self, id: u64, vendor: &str, pool: &str, path: &str) -> TrafficIntent {
        TrafficIntent::new(id, self.destination(), vendor, pool).with_path(path)
    }

    /// Direct-mode transport (no proxy) carrying `vendor`'s auth header.
    pub fn transport(&self, vendor: &str, header: (&str, &str)) -> HttpTransport {
        let mut headers = BTreeMap::new();
        headers.insert(header.0.to_string(), header.1.to_string());
        HttpTransport::new(Duration::from_secs(5))
            .unwrap()
            .with_vendor_headers(vendor, &headers)
            .unwrap()
    }

    /// Expect `hits` requests tagged with the given vendor and pool.
    pub async fn mock_tagged(
        &self,
        method: &str,
        path: &str,
        vendor: &str,
        pool: &str,
        status: usize,
        body: &str,
        hits: usize,
    ) -> Mock {
        let mut server = self.server.lock().await;
        server
            .mock(method, path)
            .match_header("x-proxy-vendor", vendor)
            .match_header("x-proxy-pool", pool)
            .match_header("x-request-id", Matcher::Any)
            .match_header("user-agent", Matcher::Regex(format!("^Crawler-{}-\\d{{4}}$", vendor)))
            .with_status(status)
            .with_body(body)
            .expect(hits)
            .create_async()
            .await
    }
}
