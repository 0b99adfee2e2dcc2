//! Intent sources fed into the dispatcher, one per named traffic pattern.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tracing::info;

use super::{RateLimiterConfig, RequestScheduler};
use crate::config::LoadgenConfig;
use crate::types::TrafficIntent;
use crate::vendor::VendorRegistry;
use crate::{Error, ErrorContext, Result};

/// A stream of intents with its own pacing and intake window.
pub struct TrafficSource<S> {
    pub(crate) name: String,
    pub(crate) intents: S,
    pub(crate) pacing: Option<RateLimiterConfig>,
    pub(crate) duration: Option<Duration>,
}

/// Sources whose streams differ in type, e.g. one per pattern.
pub type BoxedSource = TrafficSource<BoxStream<'static, TrafficIntent>>;

impl<S> TrafficSource<S>
where
    S: Stream<Item = TrafficIntent>,
{
    pub fn new(name: impl Into<String>, intents: S) -> Self {
        Self {
            name: name.into(),
            intents,
            pacing: None,
            duration: None,
        }
    }

    /// Accept at most `rps` intents per second; zero disables pacing.
    pub fn with_requests_per_second(mut self, rps: f64) -> Self {
        self.pacing = RateLimiterConfig::from_rps(rps);
        self
    }

    pub fn with_pacing(mut self, pacing: Option<RateLimiterConfig>) -> Self {
        self.pacing = pacing;
        self
    }

    /// Stop accepting from this source after `duration`.
    pub fn with_duration(mut self, duration: Option<Duration>) -> Self {
        self.duration = duration;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn requests_per_second(&self) -> Option<f64> {
        self.pacing.as_ref().map(|p| p.rps)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }
}

/// One paced source per selected pattern, in the order given.
///
/// Patterns share the intent id space. With a configured seed each pattern
/// gets `seed + index` so runs stay reproducible without repeating each other.
/// `max_intents` caps every source individually.
pub fn pattern_sources<N: AsRef<str>>(
    registry: &Arc<VendorRegistry>,
    cfg: &LoadgenConfig,
    names: &[N],
    max_intents: Option<usize>,
) -> Result<Vec<BoxedSource>> {
    let ids = Arc::new(AtomicU64::new(0));
    let mut sources = Vec::with_capacity(names.len());

    for (index, name) in names.iter().enumerate() {
        let name = name.as_ref();
        let Some(pattern) = cfg.traffic_patterns.get(name) else {
            let known: Vec<&str> = cfg.traffic_patterns.keys().map(String::as_str).collect();
            return Err(Error::validation_with_context(
                format!("unknown traffic pattern '{}'", name),
                ErrorContext::new()
                    .with_field_path("traffic_patterns")
                    .with_details(format!("known patterns: {}", known.join(", ")))
                    .with_source("pattern_selection"),
            ));
        };

        let mut scheduler =
            RequestScheduler::for_pattern(registry.clone(), cfg, name, pattern)?.with_shared_ids(ids.clone());
        if let Some(seed) = cfg.scheduling.seed {
            scheduler = scheduler.with_seed(seed.wrapping_add(index as u64));
        }
        let intents = match max_intents {
            Some(n) => scheduler.into_stream().take(n).boxed(),
            None => scheduler.into_stream().boxed(),
        };

        let source = TrafficSource::new(name, intents)
            .with_pacing(pattern.requests_per_second.and_then(RateLimiterConfig::from_rps))
            .with_duration(pattern.duration());
        info!(
            pattern = name,
            rps = source.requests_per_second(),
            duration_secs = pattern.duration_secs,
            "traffic pattern selected"
        );
        sources.push(source);
    }
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_patterns_become_sources() {
        let cfg = LoadgenConfig::builtin();
        let registry = Arc::new(VendorRegistry::from_config(&cfg));
        let sources = pattern_sources(&registry, &cfg, &["steady", "burst"], None).unwrap();

        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].name(), "steady");
        assert_eq!(sources[0].requests_per_second(), Some(10.0));
        assert_eq!(sources[0].duration(), Some(Duration::from_secs(3600)));
        assert_eq!(sources[1].requests_per_second(), Some(50.0));
        assert_eq!(sources[1].duration(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_unknown_pattern_is_rejected() {
        let cfg = LoadgenConfig::builtin();
        let registry = Arc::new(VendorRegistry::from_config(&cfg));
        let err = pattern_sources(&registry, &cfg, &["steady", "flood"], None)
            .err()
            .unwrap();

        assert!(err.to_string().contains("unknown traffic pattern 'flood'"));
        let ctx = err.context().unwrap();
        assert_eq!(ctx.field_path.as_deref(), Some("traffic_patterns"));
        assert_eq!(ctx.details.as_deref(), Some("known patterns: burst, spike, steady"));
    }

    #[tokio::test]
    async fn test_sources_share_id_space() {
        let cfg = LoadgenConfig::builtin();
        let registry = Arc::new(VendorRegistry::from_config(&cfg));
        let mut sources = pattern_sources(&registry, &cfg, &["steady", "spike"], Some(3)).unwrap();

        let mut ids = Vec::new();
        for source in sources.iter_mut() {
            while let Some(intent) = source.intents.next().await {
                ids.push(intent.id);
            }
        }
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
    }
}
