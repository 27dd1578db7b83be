use std::{
    sync::atomic::AtomicU64,
    time::{Duration, SystemTime},
};

use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge, histogram::Histogram},
    registry::Registry,
};

use crate::general::clock::unix_seconds;

pub const REQUEST_DURATION: &str = "metrics_server_kubelet_summary_request_duration_seconds";
// the text encoder appends `_total`
pub const SCRAPES: &str = "metrics_server_kubelet_summary_scrapes";
pub const LAST_SCRAPE: &str = "metrics_server_scraper_last_time_seconds";

const LATENCY_BUCKETS: [f64; 11] = [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct NodeLabels {
    pub node: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SuccessLabels {
    pub success: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SourceLabels {
    pub source: String,
}

fn latency_histogram() -> Histogram {
    Histogram::new(LATENCY_BUCKETS.iter().copied())
}

/// Scrape health instruments. Cheap to clone, clones share the series.
#[derive(Clone)]
pub struct ScrapeMetrics {
    request_duration: Family<NodeLabels, Histogram, fn() -> Histogram>,
    scrapes: Family<SuccessLabels, Counter>,
    last_scrape: Family<SourceLabels, Gauge<f64, AtomicU64>>,
}

impl Default for ScrapeMetrics {
    fn default() -> Self {
        Self {
            request_duration: Family::new_with_constructor(latency_histogram as fn() -> Histogram),
            scrapes: Family::default(),
            last_scrape: Family::default(),
        }
    }
}

impl ScrapeMetrics {
    pub fn register(&self, registry: &mut Registry) {
        registry.register(
            REQUEST_DURATION,
            "The Kubelet summary request latencies in seconds.",
            self.request_duration.clone(),
        );
        registry.register(
            SCRAPES,
            "Total number of attempted Summary API scrapes done by Metrics Server",
            self.scrapes.clone(),
        );
        registry.register(
            LAST_SCRAPE,
            "Last time metrics-server performed a scrape since unix epoch in seconds.",
            self.last_scrape.clone(),
        );
    }

    /// One observation per node and attempt, whatever the outcome.
    pub fn observe_request(&self, node: &str, latency: Duration) {
        self.request_duration
            .get_or_create(&NodeLabels {
                node: node.to_owned(),
            })
            .observe(latency.as_secs_f64());
    }

    /// One increment per scrape cycle.
    pub fn record_scrape(&self, success: bool) {
        let _ = self
            .scrapes
            .get_or_create(&SuccessLabels {
                success: success.to_string(),
            })
            .inc();
    }

    /// Only called after a node was fetched successfully.
    pub fn mark_scraped(&self, node: &str, at: SystemTime) {
        let _ = self
            .last_scrape
            .get_or_create(&SourceLabels {
                source: node.to_owned(),
            })
            .set(unix_seconds(at));
    }

    /// Drops every series, the registration stays.
    #[cfg(test)]
    pub fn reset(&self) {
        self.request_duration.clear();
        self.scrapes.clear();
        self.last_scrape.clear();
    }
}

pub fn new_registry_and_metrics() -> (ScrapeMetrics, Registry) {
    let mut registry = Registry::default();
    let metrics = ScrapeMetrics::default();
    metrics.register(&mut registry);
    (metrics, registry)
}

#[cfg(test)]
pub(crate) mod test {
    use std::time::UNIX_EPOCH;

    use prometheus_client::encoding::text::encode;

    use super::*;

    /// Value of the sample line starting with `series`, if present.
    pub(crate) fn sample(registry: &Registry, series: &str) -> Option<f64> {
        let mut text = String::new();
        encode(&mut text, registry).unwrap();
        text.lines()
            .find_map(|line| line.strip_prefix(series))
            .and_then(|rest| rest.trim().split(' ').next())
            .and_then(|v| v.parse().ok())
    }

    #[test]
    fn test_latency_histogram() {
        let (metrics, registry) = new_registry_and_metrics();
        metrics.observe_request("node1", Duration::from_secs(1));
        metrics.observe_request("node1", Duration::from_millis(500));
        metrics.observe_request("node2", Duration::from_secs(3));

        let count = format!("{}_count{{node=\"node1\"}}", REQUEST_DURATION);
        let sum = format!("{}_sum{{node=\"node1\"}}", REQUEST_DURATION);
        assert_eq!(sample(&registry, &count), Some(2.0));
        assert_eq!(sample(&registry, &sum), Some(1.5));
        let count = format!("{}_count{{node=\"node2\"}}", REQUEST_DURATION);
        assert_eq!(sample(&registry, &count), Some(1.0));
    }

    #[test]
    fn test_scrape_counter_labels() {
        let (metrics, registry) = new_registry_and_metrics();
        metrics.record_scrape(true);
        metrics.record_scrape(true);
        metrics.record_scrape(false);
        assert_eq!(
            sample(
                &registry,
                "metrics_server_kubelet_summary_scrapes_total{success=\"true\"}"
            ),
            Some(2.0)
        );
        assert_eq!(
            sample(
                &registry,
                "metrics_server_kubelet_summary_scrapes_total{success=\"false\"}"
            ),
            Some(1.0)
        );
    }

    #[test]
    fn test_last_scrape_gauge_overwritten() {
        let (metrics, registry) = new_registry_and_metrics();
        let series = format!("{}{{source=\"node1\"}}", LAST_SCRAPE);
        metrics.mark_scraped("node1", UNIX_EPOCH + Duration::from_secs(100));
        metrics.mark_scraped("node1", UNIX_EPOCH + Duration::from_millis(250_700));
        assert_eq!(sample(&registry, &series), Some(250.0));
    }

    #[test]
    fn test_reset_clears_series() {
        let (metrics, registry) = new_registry_and_metrics();
        metrics.observe_request("node1", Duration::from_secs(1));
        metrics.record_scrape(true);
        metrics.mark_scraped("node1", UNIX_EPOCH);
        metrics.reset();

        let mut text = String::new();
        encode(&mut text, &registry).unwrap();
        assert!(!text.contains("node1"));
        assert!(!text.contains("success="));
        assert!(text.contains(&format!("# TYPE {} histogram", REQUEST_DURATION)));
    }
}
