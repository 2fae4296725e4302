//! Metrics and observability utilities
//!
//! Provides Prometheus metrics for the comment pipeline
//! with standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all ReplyLens metrics
pub const METRICS_PREFIX: &str = "replylens";

/// Buckets for single annotation calls
pub const ANNOTATION_BUCKETS: &[f64] = &[
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.000, // 2s
    5.000, // 5s
    10.00, // 10s
    30.00, // 30s
];

/// Buckets for whole pipeline runs; page pacing alone adds seconds per page
pub const PIPELINE_BUCKETS: &[f64] = &[
    1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0, 300.0, 600.0,
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Collection metrics
    describe_counter!(
        format!("{}_pages_fetched_total", METRICS_PREFIX),
        Unit::Count,
        "Comment pages fetched from upstream"
    );

    describe_counter!(
        format!("{}_comments_collected_total", METRICS_PREFIX),
        Unit::Count,
        "Comments kept after noise filtering"
    );

    describe_counter!(
        format!("{}_comments_discarded_total", METRICS_PREFIX),
        Unit::Count,
        "Comments dropped as noise"
    );

    // Annotation metrics
    describe_counter!(
        format!("{}_annotations_total", METRICS_PREFIX),
        Unit::Count,
        "Annotation oracle calls by outcome"
    );

    describe_histogram!(
        format!("{}_annotation_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Annotation oracle latency in seconds"
    );

    // Storage metrics
    describe_counter!(
        format!("{}_comments_persisted_total", METRICS_PREFIX),
        Unit::Count,
        "Comment rows inserted or updated"
    );

    describe_counter!(
        format!("{}_tag_link_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Tags that could not be stored or linked"
    );

    // Pipeline metrics
    describe_counter!(
        format!("{}_pipeline_runs_total", METRICS_PREFIX),
        Unit::Count,
        "Pipeline runs by outcome"
    );

    describe_histogram!(
        format!("{}_pipeline_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end pipeline latency in seconds"
    );

    tracing::info!("Metrics registered");
}

/// Record one fetched comment page and what survived filtering
pub fn record_page(kept: usize, discarded: usize) {
    counter!(format!("{}_pages_fetched_total", METRICS_PREFIX)).increment(1);
    counter!(format!("{}_comments_collected_total", METRICS_PREFIX)).increment(kept as u64);
    counter!(format!("{}_comments_discarded_total", METRICS_PREFIX)).increment(discarded as u64);
}

/// Record one annotation call
pub fn record_annotation(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_annotations_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_annotation_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    }
}

pub fn record_persisted(rows: usize) {
    counter!(format!("{}_comments_persisted_total", METRICS_PREFIX)).increment(rows as u64);
}

pub fn record_tag_link_failure() {
    counter!(format!("{}_tag_link_failures_total", METRICS_PREFIX)).increment(1);
}

/// Helper to record pipeline run metrics
pub struct RunMetrics {
    start: Instant,
}

impl RunMetrics {
    /// Start tracking a run
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Milliseconds since the run started
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Record run completion
    pub fn finish(self, outcome: &'static str) {
        counter!(
            format!("{}_pipeline_runs_total", METRICS_PREFIX),
            "outcome" => outcome
        )
        .increment(1);

        histogram!(
            format!("{}_pipeline_duration_seconds", METRICS_PREFIX),
            "outcome" => outcome
        )
        .record(self.start.elapsed().as_secs_f64());
    }
}
