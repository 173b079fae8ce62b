use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, trace};

use crate::persistence::CommandStore;
use crate::runtime::ShutdownToken;
use crate::telemetry::MetricsSink;

/// Periodically samples the store summary into the metrics sink.
pub struct SummaryReporter {
    store: Arc<dyn CommandStore>,
    metrics: Arc<dyn MetricsSink>,
    command_types: Vec<String>,
    interval: Duration,
    shutdown: ShutdownToken,
}

impl SummaryReporter {
    pub fn new(
        store: Arc<dyn CommandStore>,
        metrics: Arc<dyn MetricsSink>,
        command_types: Vec<String>,
        interval: Duration,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            store,
            metrics,
            command_types,
            interval,
            shutdown,
        }
    }

    /// Sample once. Failures are logged, never returned.
    pub async fn report_once(&self) {
        match self.store.summary().await {
            Ok(summary) => {
                trace!(rows = summary.len(), "storage summary sampled");
                self.metrics.record_storage_summary(&summary);
            }
            Err(err) => error!(error = %err, "Error when processing storage summary"),
        }
    }

    pub async fn run(self) {
        self.metrics.init_command_types(&self.command_types);
        while self.shutdown.sleep(self.interval).await.is_ok() {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.report_once() => {}
            }
        }
        info!("Summary reporter shutting down");
    }
}
