use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Tokens per second.
    pub rps: f64,
    /// Maximum burst size (tokens).
    pub burst: f64,
}

impl RateLimiterConfig {
    pub fn from_rps(rps: f64) -> Option<Self> {
        if !rps.is_finite() || rps < 0.0 {
            return None;
        }
        Some(Self {
            rps,
            burst: rps.max(1.0),
        })
    }

    pub fn with_burst(mut self, burst: f64) -> Self {
        self.burst = burst.max(1.0);
        self
    }
}

#[derive(Debug)]
struct State {
    tokens: f64,
    last: Instant,
}

/// Token bucket that paces intent intake and per-vendor attempts.
///
/// A rate of zero means unpaced.
#[derive(Debug)]
pub struct RateLimiter {
    cfg: RateLimiterConfig,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Self {
        let state = Mutex::new(State {
            tokens: cfg.burst,
            last: Instant::now(),
        });
        Self { cfg, state }
    }

    pub fn rps(&self) -> f64 {
        self.cfg.rps
    }

    fn refill_locked(cfg: &RateLimiterConfig, st: &mut State) {
        let now = Instant::now();
        let elapsed = now.duration_since(st.last).as_secs_f64();
        if elapsed > 0.0 {
            st.tokens = (st.tokens + elapsed * cfg.rps).min(cfg.burst);
            st.last = now;
        }
    }

    /// Take one token, sleeping until one is available.
    pub async fn acquire(&self) {
        let cfg = &self.cfg;
        if cfg.rps <= 0.0 {
            return;
        }

        loop {
            let wait = {
                let mut st = self.state.lock().await;
                Self::refill_locked(cfg, &mut st);
                if st.tokens >= 1.0 {
                    st.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - st.tokens) / cfg.rps)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Take one token if one is available right now, else report how long until one is.
    pub async fn try_acquire(&self) -> Result<(), Duration> {
        let cfg = &self.cfg;
        if cfg.rps <= 0.0 {
            return Ok(());
        }

        let mut st = self.state.lock().await;
        Self::refill_locked(cfg, &mut st);
        if st.tokens >= 1.0 {
            st.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - st.tokens) / cfg.rps))
        }
    }
}
