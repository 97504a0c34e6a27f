//! Prometheus metrics collector (ambient stack, SPEC_FULL.md §10.3):
//! request counters by status bucket, upstream latency histograms, breaker
//! state gauges, and cache hit/miss counters, exposed on a dedicated
//! metrics endpoint.

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

pub struct MetricsCollector {
    registry: Registry,

    /// Total requests by connector slug, method, and status.
    pub http_requests_total: IntCounterVec,

    /// Request latency histogram by connector slug.
    pub http_request_duration: HistogramVec,

    /// Upstream dispatch latency histogram by connector slug.
    pub upstream_latency: HistogramVec,

    /// Circuit breaker state by connector slug: 0 = closed, 1 = half-open, 2 = open.
    pub breaker_state: IntGaugeVec,

    /// Response cache hit/miss counters by connector slug.
    pub cache_results_total: IntCounterVec,
}

impl MetricsCollector {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("gateway_http_requests_total", "Total HTTP requests").namespace("gateway"),
            &["connector", "method", "status"],
        )?;

        let http_request_duration = HistogramVec::new(
            HistogramOpts::new("gateway_http_request_duration_seconds", "Request latency")
                .namespace("gateway")
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["connector"],
        )?;

        let upstream_latency = HistogramVec::new(
            HistogramOpts::new("gateway_upstream_latency_seconds", "Upstream dispatch latency")
                .namespace("gateway")
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["connector"],
        )?;

        let breaker_state = IntGaugeVec::new(
            Opts::new("gateway_circuit_breaker_state", "Circuit breaker state per connector").namespace("gateway"),
            &["connector"],
        )?;

        let cache_results_total = IntCounterVec::new(
            Opts::new("gateway_response_cache_results_total", "Response cache hit/miss counts").namespace("gateway"),
            &["connector", "result"],
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;
        registry.register(Box::new(upstream_latency.clone()))?;
        registry.register(Box::new(breaker_state.clone()))?;
        registry.register(Box::new(cache_results_total.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration,
            upstream_latency,
            breaker_state,
            cache_results_total,
        })
    }

    pub fn record_request(&self, connector_slug: &str, method: &str, status: u16, duration_secs: f64) {
        self.http_requests_total
            .with_label_values(&[connector_slug, method, &status.to_string()])
            .inc();
        self.http_request_duration.with_label_values(&[connector_slug]).observe(duration_secs);
    }

    pub fn record_upstream_latency(&self, connector_slug: &str, duration_secs: f64) {
        self.upstream_latency.with_label_values(&[connector_slug]).observe(duration_secs);
    }

    pub fn set_breaker_state(&self, connector_slug: &str, state: i64) {
        self.breaker_state.with_label_values(&[connector_slug]).set(state);
    }

    pub fn record_cache_result(&self, connector_slug: &str, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_results_total.with_label_values(&[connector_slug, result]).inc();
    }

    /// Prometheus text exposition for the metrics endpoint.
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let metrics = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metrics, &mut buffer).unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("failed to construct metrics collector")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_text_includes_registered_metric_families() {
        let collector = MetricsCollector::new().unwrap();
        collector.record_request("openai", "GET", 200, 0.05);
        collector.set_breaker_state("openai", 0);
        collector.record_cache_result("openai", true);
        let text = collector.gather_text();
        assert!(text.contains("gateway_http_requests_total"));
        assert!(text.contains("gateway_circuit_breaker_state"));
        assert!(text.contains("gateway_response_cache_results_total"));
    }
}
