use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::ProcessingConfig;
use crate::handler::PipelineContext;
use crate::persistence::CommandStore;
use crate::telemetry::MetricsSink;

use super::fetcher::FetchLoop;
use super::handoff::handoff;
use super::summary::SummaryReporter;
use super::worker::{worker_loop, Dispatcher};
use super::ShutdownToken;

/// Background processing for one queue table.
///
/// Owns the fetch loop, the worker pool and the summary reporter. Built by
/// [`CommandRuntimeBuilder`](super::CommandRuntimeBuilder).
pub struct CommandRuntime {
    config: ProcessingConfig,
    dispatcher: Arc<Dispatcher>,
    ctx: PipelineContext,
    started: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for CommandRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let task_count = self
            .handles
            .try_lock()
            .map(|handles| handles.len())
            .unwrap_or_default();

        f.debug_struct("CommandRuntime")
            .field("config", &self.config)
            .field("command_types", &self.dispatcher.command_types())
            .field("task_count", &task_count)
            .field("shutdown_cancelled", &self.ctx.shutdown.is_cancelled())
            .finish()
    }
}

impl CommandRuntime {
    pub(crate) fn new(
        config: ProcessingConfig,
        dispatcher: Dispatcher,
        store: Arc<dyn CommandStore>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            config,
            dispatcher: Arc::new(dispatcher),
            ctx: PipelineContext {
                store,
                metrics,
                shutdown: ShutdownToken::new(),
            },
            started: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Get the runtime configuration.
    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    /// Command types with a registered pipeline.
    pub fn command_types(&self) -> Vec<String> {
        self.dispatcher.command_types()
    }

    /// Get a clone of the store.
    pub fn store(&self) -> Arc<dyn CommandStore> {
        Arc::clone(&self.ctx.store)
    }

    /// Token that stops every background task when cancelled.
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.ctx.shutdown.clone()
    }

    /// Spawn the fetch loop, `workers_count` workers and the summary
    /// reporter. Fails if called twice.
    pub async fn start(&self) -> anyhow::Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            anyhow::bail!("command runtime already started");
        }

        let (sender, receiver) = handoff(self.config.prefetch_count);
        let mut handles = self.handles.lock().await;

        let fetch = FetchLoop::new(
            Arc::clone(&self.ctx.store),
            sender,
            &self.config,
            self.ctx.shutdown.clone(),
        );
        handles.push(tokio::spawn(fetch.run()));

        let worker_group = format!("localq-{}", std::process::id());
        for i in 0..self.config.workers_count {
            let worker_id = format!("{}-w{}", worker_group, i);
            handles.push(tokio::spawn(worker_loop(
                worker_id,
                receiver.clone(),
                Arc::clone(&self.dispatcher),
                self.ctx.clone(),
            )));
        }

        let reporter = SummaryReporter::new(
            Arc::clone(&self.ctx.store),
            Arc::clone(&self.ctx.metrics),
            self.dispatcher.command_types(),
            self.config.summary_interval,
            self.ctx.shutdown.clone(),
        );
        handles.push(tokio::spawn(reporter.run()));

        tracing::info!(
            workers = self.config.workers_count,
            prefetch_count = self.config.prefetch_count,
            "Command runtime started"
        );
        Ok(())
    }

    /// Cancel every task and wait for each one up to `shutdown_timeout`.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        tracing::info!("Initiating graceful shutdown of command runtime");

        self.ctx.shutdown.cancel();

        let handles = {
            let mut guard = self.handles.lock().await;
            std::mem::take(&mut *guard)
        };

        for handle in handles {
            match tokio::time::timeout(self.config.shutdown_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("Runtime task failed: {:?}", e),
                Err(_) => {
                    tracing::warn!("Runtime task timed out during shutdown")
                }
            }
        }

        tracing::info!("Command runtime shutdown complete");
        Ok(())
    }
}
