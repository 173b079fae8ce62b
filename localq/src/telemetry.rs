//! Tracing spans and the metrics sink the engine reports to.
//!
//! Span helpers give every fetch, dispatch and handler attempt a consistent
//! set of fields. [`MetricsSink`] is the seam for point and snapshot
//! measurements; [`NoopMetrics`] discards them and
//! [`crate::metrics::PrometheusMetrics`] (feature `metrics`) exports them.
//!
//! # Example
//!
//! ```ignore
//! use localq::telemetry::instrument_dispatch;
//!
//! instrument_dispatch(&record.id, &record.command_type, async {
//!     // route and run the record
//! })
//! .await;
//! ```

use std::future::Future;
use std::time::Duration;

use tracing::{debug_span, info_span, Instrument, Span};

use crate::lease::LeaseSummary;

/// Create a tracing span for one prefetch cycle.
#[must_use]
pub fn command_fetch_span(prefetch_count: usize) -> Span {
    debug_span!("localq.fetch", prefetch_count = prefetch_count)
}

/// Create a tracing span for routing one record to its pipeline.
///
/// # Arguments
/// * `command_id` - The record identifier
/// * `command_type` - The routing key
#[must_use]
pub fn command_dispatch_span(
    command_id: impl std::fmt::Display,
    command_type: impl AsRef<str>,
) -> Span {
    info_span!(
        "localq.dispatch",
        command_id = %command_id,
        command_type = %command_type.as_ref(),
    )
}

/// Create a tracing span for the handler pipeline of one record.
///
/// `try_count` is the lease count, not the attempt within the lease.
#[must_use]
pub fn command_handle_span(
    command_id: impl std::fmt::Display,
    command_type: impl AsRef<str>,
    try_count: i32,
) -> Span {
    info_span!(
        "localq.handle",
        command_id = %command_id,
        command_type = %command_type.as_ref(),
        try_count = try_count,
    )
}

/// Instrument a future with a dispatch span.
pub fn instrument_dispatch<F>(
    command_id: impl std::fmt::Display,
    command_type: impl AsRef<str>,
    future: F,
) -> impl Future<Output = F::Output>
where
    F: Future,
{
    let span = command_dispatch_span(command_id, command_type);
    future.instrument(span)
}

/// Receives queue measurements.
///
/// Implementations must be cheap and must not fail; they are called from
/// the worker hot path.
pub trait MetricsSink: Send + Sync {
    /// Seed per-type gauges at zero so idle types still report.
    fn init_command_types(&self, command_types: &[String]);

    /// Replace the queue length and max try count gauges.
    ///
    /// Types missing from `summary` drop back to zero.
    fn record_storage_summary(&self, summary: &[LeaseSummary]);

    /// One command finished and was deleted.
    fn record_completed(
        &self,
        command_type: &str,
        processing_time: Duration,
        processing_lag: Duration,
    );
}

/// Sink that drops every measurement.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn init_command_types(&self, _command_types: &[String]) {}

    fn record_storage_summary(&self, _summary: &[LeaseSummary]) {}

    fn record_completed(
        &self,
        _command_type: &str,
        _processing_time: Duration,
        _processing_lag: Duration,
    ) {
    }
}

impl<M: MetricsSink + ?Sized> MetricsSink for std::sync::Arc<M> {
    fn init_command_types(&self, command_types: &[String]) {
        (**self).init_command_types(command_types)
    }

    fn record_storage_summary(&self, summary: &[LeaseSummary]) {
        (**self).record_storage_summary(summary)
    }

    fn record_completed(
        &self,
        command_type: &str,
        processing_time: Duration,
        processing_lag: Duration,
    ) {
        (**self).record_completed(command_type, processing_time, processing_lag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_dispatch_span() {
        let span = command_dispatch_span("id-1", "orders.Ship");
        if let Some(meta) = span.metadata() {
            assert_eq!(meta.name(), "localq.dispatch");
        }
    }

    #[test]
    fn test_command_handle_span() {
        let span = command_handle_span("id-1", "orders.Ship", 2);
        if let Some(meta) = span.metadata() {
            assert_eq!(meta.name(), "localq.handle");
        }
    }

    #[tokio::test]
    async fn test_instrument_dispatch_passes_output_through() {
        let out = instrument_dispatch("id-1", "orders.Ship", async { 41 + 1 }).await;
        assert_eq!(out, 42);
    }

    #[test]
    fn test_noop_metrics_accepts_everything() {
        let sink: std::sync::Arc<dyn MetricsSink> = std::sync::Arc::new(NoopMetrics);
        sink.init_command_types(&["a".into()]);
        sink.record_storage_summary(&[]);
        sink.record_completed("a", Duration::from_millis(5), Duration::from_secs(1));
    }
}
