use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, warn, Instrument};

use crate::codec::{CommandCodec, JsonCodec};
use crate::command::{Command, CommandRecord};
use crate::error::{Error, Result};
use crate::persistence::CommandStore;
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::runtime::ShutdownToken;
use crate::telemetry::{command_handle_span, MetricsSink};

/// User logic for one command type.
///
/// Handlers may run more than once for the same command (retries within a
/// lease, or a re-lease after expiry) and should be idempotent.
#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync + 'static {
    async fn handle(&self, command: &C, shutdown: &ShutdownToken) -> anyhow::Result<()>;
}

#[async_trait]
impl<C, H> CommandHandler<C> for Arc<H>
where
    C: Command,
    H: CommandHandler<C> + ?Sized,
{
    async fn handle(&self, command: &C, shutdown: &ShutdownToken) -> anyhow::Result<()> {
        (**self).handle(command, shutdown).await
    }
}

/// Handler built from an async closure. See [`handler_fn`].
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

impl<F> std::fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerFn").finish_non_exhaustive()
    }
}

/// Wrap an async closure as a [`CommandHandler`].
///
/// The closure receives an owned clone of the command for every attempt.
pub fn handler_fn<F>(f: F) -> HandlerFn<F> {
    HandlerFn { f }
}

#[async_trait]
impl<C, F, Fut> CommandHandler<C> for HandlerFn<F>
where
    C: Command + Clone,
    F: Fn(C, ShutdownToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, command: &C, shutdown: &ShutdownToken) -> anyhow::Result<()> {
        (self.f)(command.clone(), shutdown.clone()).await
    }
}

/// Collaborators shared by every pipeline of a runtime.
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn CommandStore>,
    pub metrics: Arc<dyn MetricsSink>,
    pub shutdown: ShutdownToken,
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Type-erased pipeline the dispatcher routes records to.
#[async_trait]
pub trait RawCommandHandler: Send + Sync {
    /// Routing key this pipeline accepts.
    fn command_type(&self) -> &str;

    fn can_handle(&self, record: &CommandRecord) -> bool {
        record.command_type == self.command_type()
    }

    /// Process one leased record.
    ///
    /// Handler and decoding failures are logged and swallowed here. Only
    /// cancellation is returned.
    async fn handle(&self, record: &CommandRecord, ctx: &PipelineContext) -> Result<()>;
}

/// Retried decode, lease check, handler call, delete and metrics.
pub struct CommandPipeline<C, H, K = JsonCodec> {
    command_type: String,
    handler: H,
    codec: Arc<K>,
    retry: RetryPolicy,
    _command: PhantomData<fn() -> C>,
}

impl<C, H, K> std::fmt::Debug for CommandPipeline<C, H, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPipeline")
            .field("command_type", &self.command_type)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl<C, H, K> CommandPipeline<C, H, K>
where
    C: Command,
    H: CommandHandler<C>,
    K: CommandCodec,
{
    pub fn new(handler: H, codec: Arc<K>, retry: RetryPolicy) -> Self {
        Self {
            command_type: C::command_type().to_string(),
            handler,
            codec,
            retry,
            _command: PhantomData,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    async fn attempt(&self, record: &CommandRecord, ctx: &PipelineContext) -> anyhow::Result<()> {
        let command: C = self.codec.decode(&record.data).map_err(|cause| Error::Decode {
            command_type: record.command_type.clone(),
            cause,
        })?;

        if record.is_lock_expired() {
            debug!(command_id = %record.id, "lease expired before processing, skipping");
            return Ok(());
        }

        let started = Instant::now();
        self.handler.handle(&command, &ctx.shutdown).await?;
        let processing_time = started.elapsed();

        // A failed delete fails the attempt, so the handler runs again.
        ctx.store.delete(record.id).await?;

        let processing_lag = (Utc::now() - record.created_at_utc)
            .to_std()
            .unwrap_or_default();
        ctx.metrics
            .record_completed(&self.command_type, processing_time, processing_lag);
        debug!(
            command_id = %record.id,
            processing_ms = processing_time.as_millis() as u64,
            "command processed"
        );
        Ok(())
    }
}

#[async_trait]
impl<C, H, K> RawCommandHandler for CommandPipeline<C, H, K>
where
    C: Command,
    H: CommandHandler<C>,
    K: CommandCodec,
{
    fn command_type(&self) -> &str {
        &self.command_type
    }

    async fn handle(&self, record: &CommandRecord, ctx: &PipelineContext) -> Result<()> {
        let span = command_handle_span(record.id, &record.command_type, record.try_count);

        async {
            let outcome = self
                .retry
                .execute(
                    &ctx.shutdown,
                    |_| self.attempt(record, ctx),
                    |attempt, err| {
                        error!(
                            command_id = %record.id,
                            attempt,
                            error = %err,
                            "command processing failed"
                        );
                    },
                )
                .await?;

            if let RetryOutcome::Exhausted { attempts } = outcome {
                warn!(
                    command_id = %record.id,
                    attempts,
                    try_count = record.try_count,
                    "retries exhausted, command stays leased until the lease expires"
                );
            }
            Ok::<(), Error>(())
        }
        .instrument(span)
        .await
    }
}
