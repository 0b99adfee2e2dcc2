//! In-process transport with scripted results

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use proxy_loadgen::{Transport, TransportError, TransportRequest, TransportResponse};

type Script = Box<dyn Fn(&TransportRequest) -> Result<u16, TransportError> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct Call {
    pub intent_id: u64,
    pub vendor: String,
    pub pool: String,
    pub attempt: u32,
    pub at: Instant,
}

#[derive(Default)]
struct Occupancy {
    current: usize,
    peak: usize,
}

/// Answers each attempt from a closure and records what it saw.
pub struct ScriptedTransport {
    script: Script,
    delay: Duration,
    calls: Mutex<Vec<Call>>,
    occupancy: Mutex<HashMap<String, Occupancy>>,
}

impl ScriptedTransport {
    pub fn new(
        script: impl Fn(&TransportRequest) -> Result<u16, TransportError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            occupancy: Mutex::new(HashMap::new()),
        }
    }

    /// Every attempt gets `status`.
    pub fn status(status: u16) -> Self {
        Self::new(move |_| Ok(status))
    }

    /// Each attempt takes this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, intent_id: u64) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.intent_id == intent_id)
            .collect()
    }

    /// Highest number of simultaneous attempts seen on a pool.
    pub fn peak(&self, vendor: &str, pool: &str) -> usize {
        self.occupancy
            .lock()
            .unwrap()
            .get(&format!("{}/{}", vendor, pool))
            .map(|o| o.peak)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        let key = format!("{}/{}", request.vendor_id, request.pool_id);
        self.calls.lock().unwrap().push(Call {
            intent_id: request.intent_id,
            vendor: request.vendor_id.clone(),
            pool: request.pool_id.clone(),
            attempt: request.attempt,
            at: Instant::now(),
        });
        {
            let mut occ = self.occupancy.lock().unwrap();
            let o = occ.entry(key.clone()).or_default();
            o.current += 1;
            o.peak = o.peak.max(o.current);
        }

        let started = Instant::now();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = (self.script)(request);

        if let Some(o) = self.occupancy.lock().unwrap().get_mut(&key) {
            o.current -= 1;
        }

        result.map(|status_code| TransportResponse {
            status_code,
            bytes_sent: request.payload_size as u64,
            bytes_received: 64,
            latency: started.elapsed(),
        })
    }
}
