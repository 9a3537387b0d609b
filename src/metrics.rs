use crate::{Result, ThumbError};
use metrics::{describe_counter, describe_histogram, histogram, increment_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use tracing::info;

pub const CACHE_HITS: &str = "pagethumb_cache_hits_total";
pub const RENDERS: &str = "pagethumb_renders_total";
pub const FETCHES: &str = "pagethumb_fetches_total";
pub const FAILURES: &str = "pagethumb_failures_total";
pub const RENDER_SECONDS: &str = "pagethumb_render_seconds";

/// Records pipeline events through the `metrics` facade. Without an
/// installed recorder every call is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics;

impl Metrics {
    pub fn new() -> Self {
        Self
    }

    pub fn record_cache_hit(&self) {
        increment_counter!(CACHE_HITS);
    }

    pub fn record_render(&self, duration: Duration) {
        increment_counter!(RENDERS);
        histogram!(RENDER_SECONDS, duration.as_secs_f64());
    }

    pub fn record_fetch(&self) {
        increment_counter!(FETCHES);
    }

    pub fn record_failure(&self, error: &ThumbError) {
        increment_counter!(FAILURES, "kind" => error.kind());
    }
}

/// Installs a Prometheus recorder as the global metrics recorder.
///
/// The returned handle renders the text exposition format on demand. Only
/// one recorder can be installed per process.
pub fn install_prometheus() -> Result<PrometheusHandle> {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    metrics::set_boxed_recorder(Box::new(recorder))
        .map_err(|e| ThumbError::Config(format!("failed to install metrics recorder: {e}")))?;

    describe_counter!(CACHE_HITS, "Thumbnails served from the cache");
    describe_counter!(RENDERS, "Pages rendered by the external renderer");
    describe_counter!(FETCHES, "Images downloaded directly");
    describe_counter!(FAILURES, "Failed thumbnail requests by error kind");
    describe_histogram!(RENDER_SECONDS, "Duration of renderer invocations in seconds");

    info!("Prometheus metrics recorder installed");
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_exposition() {
        let handle = install_prometheus().unwrap();
        let metrics = Metrics::new();

        metrics.record_cache_hit();
        metrics.record_render(Duration::from_millis(1500));
        metrics.record_failure(&ThumbError::Timeout(Duration::from_secs(30)));

        let text = handle.render();
        assert!(text.contains(CACHE_HITS));
        assert!(text.contains(RENDERS));
        assert!(text.contains(r#"kind="timeout""#));

        assert!(install_prometheus().is_err());
    }
}
