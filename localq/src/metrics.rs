//! Prometheus metrics for the command queue.
//!
//! All metrics are conditionally compiled behind the `metrics` feature flag.
//!
//! # Metrics
//!
//! ## Gauges
//! - `localq_queue_length` - Records pending in storage per command type
//! - `localq_max_try_count` - Highest lease count per command type
//!
//! ## Histograms
//! - `localq_processing_time_seconds` - Handler wall-clock time
//! - `localq_processing_lag_seconds` - Time from enqueue to completion
//!
//! ## Counters
//! - `localq_completed_total` - Commands processed and deleted
#![cfg(feature = "metrics")]

use std::collections::BTreeSet;
use std::sync::LazyLock;
use std::time::Duration;

use parking_lot::Mutex;
use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};

use crate::lease::LeaseSummary;
use crate::telemetry::MetricsSink;

/// Histogram boundaries in seconds.
pub const DURATION_BUCKETS: [f64; 11] =
    [0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0];

/// Global Prometheus registry for localq metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Gauge for records pending in storage.
///
/// Labels:
/// - `command_type`: The routing key
pub static QUEUE_LENGTH: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "localq_queue_length",
        "Number of commands pending in storage",
    );
    GaugeVec::new(opts, &["command_type"])
        .expect("localq_queue_length metric creation failed")
});

/// Gauge for the highest lease count among pending records.
///
/// Labels:
/// - `command_type`: The routing key
pub static MAX_TRY_COUNT: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "localq_max_try_count",
        "Highest try count among pending commands",
    );
    GaugeVec::new(opts, &["command_type"])
        .expect("localq_max_try_count metric creation failed")
});

/// Histogram for handler processing time in seconds.
pub static PROCESSING_TIME_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        "localq_processing_time_seconds",
        "Command processing time in seconds",
    )
    .buckets(DURATION_BUCKETS.to_vec());
    HistogramVec::new(opts, &["command_type"])
        .expect("localq_processing_time_seconds metric creation failed")
});

/// Histogram for time between enqueue and completion in seconds.
pub static PROCESSING_LAG_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        "localq_processing_lag_seconds",
        "Time from enqueue to completion in seconds",
    )
    .buckets(DURATION_BUCKETS.to_vec());
    HistogramVec::new(opts, &["command_type"])
        .expect("localq_processing_lag_seconds metric creation failed")
});

/// Counter for commands processed and deleted.
pub static COMPLETED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "localq_completed_total",
        "Total number of commands completed",
    );
    CounterVec::new(opts, &["command_type"])
        .expect("localq_completed_total metric creation failed")
});

/// Register all metrics with the global registry.
///
/// This function is idempotent - calling it multiple times is safe.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(QUEUE_LENGTH.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(MAX_TRY_COUNT.clone()),
        Box::new(PROCESSING_TIME_SECONDS.clone()),
        Box::new(PROCESSING_LAG_SECONDS.clone()),
        Box::new(COMPLETED_TOTAL.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            if !matches!(e, prometheus::Error::AlreadyReg) {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}

/// [`MetricsSink`] writing to the global Prometheus registry.
///
/// Remembers every command type it has reported so a summary that no
/// longer mentions a type resets its gauges to zero.
#[derive(Debug, Default)]
pub struct PrometheusMetrics {
    known_types: Mutex<BTreeSet<String>>,
}

impl PrometheusMetrics {
    /// Register the metrics and build a sink.
    pub fn new() -> anyhow::Result<Self> {
        init_metrics()?;
        Ok(Self::default())
    }
}

impl MetricsSink for PrometheusMetrics {
    fn init_command_types(&self, command_types: &[String]) {
        let mut known = self.known_types.lock();
        for command_type in command_types {
            QUEUE_LENGTH.with_label_values(&[command_type.as_str()]).set(0.0);
            MAX_TRY_COUNT.with_label_values(&[command_type.as_str()]).set(0.0);
            known.insert(command_type.clone());
        }
    }

    fn record_storage_summary(&self, summary: &[LeaseSummary]) {
        let mut known = self.known_types.lock();
        for command_type in known.iter() {
            QUEUE_LENGTH.with_label_values(&[command_type.as_str()]).set(0.0);
            MAX_TRY_COUNT.with_label_values(&[command_type.as_str()]).set(0.0);
        }
        for row in summary {
            QUEUE_LENGTH
                .with_label_values(&[row.command_type.as_str()])
                .set(row.count as f64);
            MAX_TRY_COUNT
                .with_label_values(&[row.command_type.as_str()])
                .set(f64::from(row.max_try_count));
            known.insert(row.command_type.clone());
        }
    }

    fn record_completed(
        &self,
        command_type: &str,
        processing_time: Duration,
        processing_lag: Duration,
    ) {
        PROCESSING_TIME_SECONDS
            .with_label_values(&[command_type])
            .observe(processing_time.as_secs_f64());
        PROCESSING_LAG_SECONDS
            .with_label_values(&[command_type])
            .observe(processing_lag.as_secs_f64());
        COMPLETED_TOTAL.with_label_values(&[command_type]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        init_metrics().expect("metrics initialization should succeed");
        init_metrics().expect("second initialization should succeed");
    }

    #[test]
    fn test_summary_resets_missing_types() {
        let sink = PrometheusMetrics::new().expect("sink");
        sink.init_command_types(&["metrics_test.Reset".into()]);
        sink.record_storage_summary(&[LeaseSummary {
            command_type: "metrics_test.Reset".into(),
            count: 4,
            max_try_count: 2,
        }]);
        assert_eq!(
            QUEUE_LENGTH
                .with_label_values(&["metrics_test.Reset"])
                .get(),
            4.0
        );

        sink.record_storage_summary(&[]);
        assert_eq!(
            QUEUE_LENGTH
                .with_label_values(&["metrics_test.Reset"])
                .get(),
            0.0
        );
        assert_eq!(
            MAX_TRY_COUNT
                .with_label_values(&["metrics_test.Reset"])
                .get(),
            0.0
        );
    }

    #[test]
    fn test_gather_metrics() {
        let sink = PrometheusMetrics::new().expect("sink");
        sink.record_completed(
            "metrics_test.Gather",
            Duration::from_millis(20),
            Duration::from_secs(3),
        );

        let output = gather_metrics().expect("gather should succeed");
        assert!(output.contains("localq_completed_total"));
        assert!(output.contains("localq_processing_lag_seconds"));
    }
}
