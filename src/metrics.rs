//! Prometheus metrics for engine execution
//!
//! Available metrics:
//!
//! - `taskloom_activities_completed_total{task}` - Counter of completed activities
//! - `taskloom_activities_failed_total{task}` - Counter of failed activities
//! - `taskloom_results_reclaimed_total` - Counter of reclaimed result slots
//! - `taskloom_activity_duration_seconds{task}` - Histogram of activity durations
//!
//! Each pipeline owns its own registry; nothing is registered globally.

use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, Opts, Registry, TextEncoder,
};

/// Histogram bucket boundaries for activity duration metrics (in seconds)
const ACTIVITY_DURATION_BUCKETS: &[f64] = &[0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0];

/// Per-pipeline execution metrics.
#[derive(Clone)]
pub struct EngineMetrics {
    registry: Registry,
    activities_completed: CounterVec,
    activities_failed: CounterVec,
    results_reclaimed: IntCounter,
    activity_duration: HistogramVec,
}

impl EngineMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let activities_completed = CounterVec::new(
            Opts::new(
                "taskloom_activities_completed_total",
                "Total number of completed activities",
            ),
            &["task"],
        )
        .unwrap();

        let activities_failed = CounterVec::new(
            Opts::new(
                "taskloom_activities_failed_total",
                "Total number of failed activities",
            ),
            &["task"],
        )
        .unwrap();

        let results_reclaimed = IntCounter::new(
            "taskloom_results_reclaimed_total",
            "Total number of reclaimed intermediate results",
        )
        .unwrap();

        let activity_duration = HistogramVec::new(
            HistogramOpts::new(
                "taskloom_activity_duration_seconds",
                "Activity execution duration in seconds",
            )
            .buckets(ACTIVITY_DURATION_BUCKETS.to_vec()),
            &["task"],
        )
        .unwrap();

        registry
            .register(Box::new(activities_completed.clone()))
            .unwrap();
        registry
            .register(Box::new(activities_failed.clone()))
            .unwrap();
        registry
            .register(Box::new(results_reclaimed.clone()))
            .unwrap();
        registry
            .register(Box::new(activity_duration.clone()))
            .unwrap();

        Self {
            registry,
            activities_completed,
            activities_failed,
            results_reclaimed,
            activity_duration,
        }
    }

    pub fn record_completed(&self, task: &str, duration_secs: f64) {
        self.activities_completed.with_label_values(&[task]).inc();
        self.activity_duration
            .with_label_values(&[task])
            .observe(duration_secs);
    }

    pub fn record_failed(&self, task: &str) {
        self.activities_failed.with_label_values(&[task]).inc();
    }

    pub fn record_reclaimed(&self, count: usize) {
        self.results_reclaimed.inc_by(count as u64);
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn encode_text(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EngineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_encode() {
        let metrics = EngineMetrics::new();
        metrics.record_completed("extract", 0.2);
        metrics.record_completed("extract", 0.4);
        metrics.record_failed("load");
        metrics.record_reclaimed(3);

        let text = metrics.encode_text();
        assert!(text.contains("taskloom_activities_completed_total"));
        assert!(text.contains("taskloom_activities_failed_total"));
        assert!(text.contains("taskloom_results_reclaimed_total 3"));
        assert!(text.contains("taskloom_activity_duration_seconds"));
    }

    #[test]
    fn test_registries_are_independent() {
        let first = EngineMetrics::new();
        let second = EngineMetrics::new();
        first.record_failed("t");
        assert!(!second.encode_text().contains("taskloom_activities_failed_total{task=\"t\"} 1"));
    }
}
