//! Metrics surface (SPEC_FULL.md §B.5).
//!
//! A small set of counters/histograms registered into a
//! [`prometheus_client::registry::Registry`], exposed over `/metrics`.
//! Grounded on the teacher's `core::tokio_metrics::TokioCollector`, which
//! registers its own runtime gauges into a `Registry` the same way; the
//! label/collector machinery the teacher builds out for its full request
//! pipeline is not reproduced, only enough surface to back the three named
//! series (SPEC_FULL.md §B.5).

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

use crate::schema::Provider;

#[derive(Debug, Clone, PartialEq, Eq, Hash, EncodeLabelSet)]
pub struct RequestLabels {
    pub provider: String,
    pub status: String,
}

impl RequestLabels {
    pub fn new(provider: Provider, status_code: u16) -> Self {
        RequestLabels {
            provider: provider.as_str().to_string(),
            status: status_code.to_string(),
        }
    }
}

/// Process-wide metrics registry. One instance lives on [`crate::Gateway`]
/// and is shared behind `Arc`; every request path records into it directly
/// rather than going through an intermediate event bus.
pub struct Metrics {
    registry: Registry,
    requests_total: Family<RequestLabels, Counter>,
    upstream_latency_seconds: Histogram,
    budget_rejections_total: Counter,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let requests_total = Family::<RequestLabels, Counter>::default();
        registry.register("requests_total", "total gateway requests by provider and status", requests_total.clone());

        let upstream_latency_seconds = Histogram::new(exponential_buckets(0.01, 2.0, 12));
        registry.register(
            "upstream_latency_seconds",
            "upstream call latency in seconds",
            upstream_latency_seconds.clone(),
        );

        let budget_rejections_total = Counter::default();
        registry.register(
            "budget_rejections_total",
            "requests rejected by governance budget or rate-limit checks",
            budget_rejections_total.clone(),
        );

        Metrics {
            registry,
            requests_total,
            upstream_latency_seconds,
            budget_rejections_total,
        }
    }

    pub fn record_request(&self, provider: Provider, status_code: u16, latency: std::time::Duration) {
        self.requests_total.get_or_create(&RequestLabels::new(provider, status_code)).inc();
        self.upstream_latency_seconds.observe(latency.as_secs_f64());
    }

    pub fn record_budget_rejection(&self) {
        self.budget_rejections_total.inc();
    }

    /// Renders the registry in the Prometheus text exposition format for
    /// the `/metrics` route.
    pub fn render(&self) -> String {
        let mut buf = String::new();
        encode(&mut buf, &self.registry).unwrap_or_default();
        buf
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics::new()
    }
}

fn exponential_buckets(start: f64, factor: f64, count: usize) -> impl Iterator<Item = f64> {
    (0..count).map(move |i| start * factor.powi(i as i32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_series_names() {
        let metrics = Metrics::new();
        metrics.record_request(Provider::OpenAI, 200, std::time::Duration::from_millis(50));
        metrics.record_budget_rejection();
        let text = metrics.render();
        assert!(text.contains("requests_total"));
        assert!(text.contains("upstream_latency_seconds"));
        assert!(text.contains("budget_rejections_total"));
    }
}
