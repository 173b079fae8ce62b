use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use crate::codec::{CommandCodec, JsonCodec};
use crate::command::Command;
use crate::config::{ProcessingConfig, RetryPolicyConfig};
use crate::error::{Error, Result};
use crate::handler::{CommandHandler, CommandPipeline, RawCommandHandler};
use crate::persistence::CommandStore;
use crate::retry::RetryPolicy;
use crate::telemetry::{MetricsSink, NoopMetrics};

use super::supervisor::CommandRuntime;
use super::worker::Dispatcher;

type Registration = Box<dyn FnOnce(&ProcessingConfig) -> Arc<dyn RawCommandHandler> + Send>;

/// Builder for a [`CommandRuntime`].
///
/// A store is required; metrics default to [`NoopMetrics`] and the codec to
/// [`JsonCodec`]. Each registration captures the codec current at the time
/// of the call, so set the codec first.
///
/// # Example
///
/// ```ignore
/// use localq::*;
///
/// let runtime = CommandRuntimeBuilder::new()
///     .with_store(store)
///     .with_config(ProcessingConfig::default().with_workers_count(4))
///     .register::<ShipOrder, _>(ShipOrderHandler::new(carrier))
///     .register_with_retry::<Notify, _>(notifier, RetryPolicyConfig::default().with_max_retry_count(5))
///     .build()?;
/// runtime.start().await?;
/// ```
pub struct CommandRuntimeBuilder<K = JsonCodec> {
    config: ProcessingConfig,
    store: Option<Arc<dyn CommandStore>>,
    metrics: Arc<dyn MetricsSink>,
    codec: Arc<K>,
    registrations: Vec<Registration>,
}

impl<K> fmt::Debug for CommandRuntimeBuilder<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRuntimeBuilder")
            .field("config", &self.config)
            .field("store_set", &self.store.is_some())
            .field("codec_type", &type_name::<K>())
            .field("registrations", &self.registrations.len())
            .finish()
    }
}

impl Default for CommandRuntimeBuilder<JsonCodec> {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRuntimeBuilder<JsonCodec> {
    pub fn new() -> Self {
        Self {
            config: ProcessingConfig::default(),
            store: None,
            metrics: Arc::new(NoopMetrics),
            codec: Arc::new(JsonCodec),
            registrations: Vec::new(),
        }
    }
}

impl<K: CommandCodec> CommandRuntimeBuilder<K> {
    /// Set the store the runtime leases from and deletes in.
    pub fn with_store<S: CommandStore + 'static>(mut self, store: S) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Set the metrics sink.
    pub fn with_metrics<M: MetricsSink + 'static>(mut self, metrics: M) -> Self {
        self.metrics = Arc::new(metrics);
        self
    }

    /// Replace the processing configuration.
    pub fn with_config(mut self, config: ProcessingConfig) -> Self {
        self.config = config;
        self
    }

    /// Switch the payload codec for subsequent registrations.
    pub fn with_codec<K2: CommandCodec>(self, codec: K2) -> CommandRuntimeBuilder<K2> {
        CommandRuntimeBuilder {
            config: self.config,
            store: self.store,
            metrics: self.metrics,
            codec: Arc::new(codec),
            registrations: self.registrations,
        }
    }

    /// Register `handler` for `C`, retrying per `config.retry_for(C)`.
    pub fn register<C, H>(mut self, handler: H) -> Self
    where
        C: Command,
        H: CommandHandler<C>,
    {
        let codec = Arc::clone(&self.codec);
        self.registrations.push(Box::new(move |config: &ProcessingConfig| {
            let retry = RetryPolicy::from(&config.retry_for(C::command_type()));
            Arc::new(CommandPipeline::<C, H, K>::new(handler, codec, retry))
                as Arc<dyn RawCommandHandler>
        }));
        self
    }

    /// Register `handler` for `C` with an explicit retry policy.
    pub fn register_with_retry<C, H>(mut self, handler: H, retry: RetryPolicyConfig) -> Self
    where
        C: Command,
        H: CommandHandler<C>,
    {
        let codec = Arc::clone(&self.codec);
        let retry = RetryPolicy::from(&retry);
        self.registrations.push(Box::new(move |_: &ProcessingConfig| {
            Arc::new(CommandPipeline::<C, H, K>::new(handler, codec, retry))
                as Arc<dyn RawCommandHandler>
        }));
        self
    }

    /// Validate configuration and handler registrations.
    ///
    /// Fails with [`Error::DuplicateHandlers`] when a command type was
    /// registered more than once.
    pub fn build(self) -> Result<CommandRuntime> {
        self.config.validate()?;
        let store = self
            .store
            .ok_or_else(|| Error::InvalidConfig("a command store is required".into()))?;

        let config = self.config;
        let handlers = self
            .registrations
            .into_iter()
            .map(|register| register(&config))
            .collect();
        let dispatcher = Dispatcher::new(handlers)?;

        Ok(CommandRuntime::new(config, dispatcher, store, self.metrics))
    }
}
