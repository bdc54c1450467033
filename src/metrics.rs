//! Pipeline counters.
//!
//! ## Metrics Exposed
//!
//! - `mapping_messages_total{outcome}` - messages by final outcome
//! - `mapping_pipeline_failures_total{kind}` - failures by error kind
//! - `mapping_malformed_results_total` - data-integrity failures (alert on any)
//! - `mapping_published_segments_total` - segment mappings accepted by the catalog
//!
//! [`TracingMetrics`] emits each increment as a structured event so log-based
//! metrics can aggregate them.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::info;

/// Messages by final outcome.
pub const MESSAGES_TOTAL: &str = "mapping_messages_total";
/// Failures by error kind.
pub const PIPELINE_FAILURES_TOTAL: &str = "mapping_pipeline_failures_total";
/// Malformed task results.
pub const MALFORMED_RESULTS_TOTAL: &str = "mapping_malformed_results_total";
/// Segments published.
pub const PUBLISHED_SEGMENTS_TOTAL: &str = "mapping_published_segments_total";

/// Sink for pipeline counters.
pub trait PipelineMetrics: Send + Sync {
    /// Increment a counter by `value`.
    fn add(&self, metric_name: &str, value: u64, labels: &[(&str, &str)]);

    /// Increment a counter by 1.
    fn increment(&self, metric_name: &str, labels: &[(&str, &str)]) {
        self.add(metric_name, 1, labels);
    }
}

/// Emits counters as tracing events on the `segment_mapping_publisher::metrics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl PipelineMetrics for TracingMetrics {
    fn add(&self, metric_name: &str, value: u64, labels: &[(&str, &str)]) {
        info!(
            target: "segment_mapping_publisher::metrics",
            metric = metric_name,
            value = value,
            labels = ?labels,
            "pipeline_metric"
        );
    }
}

/// No-op metrics implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpMetrics;

impl PipelineMetrics for NoOpMetrics {
    fn add(&self, _metric_name: &str, _value: u64, _labels: &[(&str, &str)]) {}
}

/// In-memory metrics for testing.
#[derive(Debug, Default)]
pub struct TestMetrics {
    /// Counter values keyed by name and labels.
    pub counters: Mutex<HashMap<String, u64>>,
}

impl PipelineMetrics for TestMetrics {
    fn add(&self, metric_name: &str, value: u64, labels: &[(&str, &str)]) {
        let key = format!("{}:{:?}", metric_name, labels);
        *self.counters.lock().entry(key).or_insert(0) += value;
    }
}

impl TestMetrics {
    /// Sum of a counter across all label sets.
    pub fn get_count(&self, metric_name: &str) -> u64 {
        let prefix = format!("{metric_name}:");
        self.counters
            .lock()
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(_, v)| v)
            .sum()
    }

    /// Value of a counter for an exact label set.
    pub fn get_labeled(&self, metric_name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = format!("{}:{:?}", metric_name, labels);
        self.counters.lock().get(&key).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_counter() {
        let metrics = TestMetrics::default();

        metrics.increment(MESSAGES_TOTAL, &[("outcome", "acked")]);
        metrics.increment(MESSAGES_TOTAL, &[("outcome", "retry")]);
        metrics.add(PUBLISHED_SEGMENTS_TOTAL, 5, &[]);

        assert_eq!(metrics.get_count(MESSAGES_TOTAL), 2);
        assert_eq!(metrics.get_labeled(MESSAGES_TOTAL, &[("outcome", "acked")]), 1);
        assert_eq!(metrics.get_count(PUBLISHED_SEGMENTS_TOTAL), 5);
        assert_eq!(metrics.get_count(MALFORMED_RESULTS_TOTAL), 0);
    }

    #[test]
    fn test_prefix_does_not_leak_between_names() {
        let metrics = TestMetrics::default();
        metrics.increment("mapping_messages_total_extra", &[]);
        assert_eq!(metrics.get_count(MESSAGES_TOTAL), 0);
    }
}
