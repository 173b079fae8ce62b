use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::command::CommandRecord;
use crate::error::{Error, Result};
use crate::handler::{PipelineContext, RawCommandHandler};
use crate::runtime::HandoffReceiver;
use crate::telemetry::instrument_dispatch;

/// Routes records to the pipeline registered for their command type.
pub struct Dispatcher {
    handlers: Vec<Arc<dyn RawCommandHandler>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("command_types", &self.command_types())
            .finish()
    }
}

impl Dispatcher {
    /// Fails with [`Error::DuplicateHandlers`] when two pipelines share a
    /// command type. Duplicates are listed in order of first appearance.
    pub fn new(handlers: Vec<Arc<dyn RawCommandHandler>>) -> Result<Self> {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        let mut duplicates = Vec::new();
        for handler in &handlers {
            let count = seen.entry(handler.command_type()).or_insert(0);
            *count += 1;
            if *count == 2 {
                duplicates.push(handler.command_type().to_string());
            }
        }

        if !duplicates.is_empty() {
            // Report in first-occurrence order of the type, not of the clash.
            let order: Vec<&str> = handlers.iter().map(|h| h.command_type()).collect();
            duplicates.sort_by_key(|name| order.iter().position(|t| *t == name.as_str()));
            return Err(Error::DuplicateHandlers(duplicates));
        }

        Ok(Self { handlers })
    }

    pub fn command_types(&self) -> Vec<String> {
        self.handlers
            .iter()
            .map(|h| h.command_type().to_string())
            .collect()
    }

    pub fn route(&self, record: &CommandRecord) -> Option<&Arc<dyn RawCommandHandler>> {
        self.handlers.iter().find(|h| h.can_handle(record))
    }

    /// Run the matching pipeline for `record`.
    ///
    /// An unroutable record is logged and left leased in storage; it comes
    /// back after every lease expiry until a handler is registered.
    pub async fn dispatch(&self, record: &CommandRecord, ctx: &PipelineContext) -> Result<()> {
        match self.route(record) {
            Some(handler) => handler.handle(record, ctx).await,
            None => {
                warn!(
                    command_id = %record.id,
                    command_type = %record.command_type,
                    try_count = record.try_count,
                    "Command handler not found, command stays leased"
                );
                Ok(())
            }
        }
    }
}

/// One worker: pop, dispatch, repeat until cancelled.
pub async fn worker_loop(
    worker_id: String,
    receiver: HandoffReceiver,
    dispatcher: Arc<Dispatcher>,
    ctx: PipelineContext,
) {
    debug!(worker_id = %worker_id, "worker started");
    loop {
        let record = match receiver.pop(&ctx.shutdown).await {
            Ok(Some(record)) => record,
            Ok(None) | Err(_) => break,
        };

        let dispatch = instrument_dispatch(
            record.id,
            &record.command_type,
            dispatcher.dispatch(&record, &ctx),
        );
        match AssertUnwindSafe(dispatch).catch_unwind().await {
            Ok(Ok(())) | Ok(Err(Error::Cancelled)) => {}
            Ok(Err(err)) => {
                error!(
                    worker_id = %worker_id,
                    command_id = %record.id,
                    error = %err,
                    "Command processing failed"
                );
            }
            Err(_) => {
                error!(
                    worker_id = %worker_id,
                    command_id = %record.id,
                    "Command handler panicked"
                );
            }
        }
    }
    info!(worker_id = %worker_id, "Worker shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::persistence::InMemoryCommandStore;
    use crate::runtime::{handoff, ShutdownToken};
    use crate::telemetry::NoopMetrics;

    struct Named {
        name: &'static str,
        calls: AtomicUsize,
        panics: bool,
    }

    impl Named {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                panics: false,
            })
        }
    }

    #[async_trait]
    impl RawCommandHandler for Named {
        fn command_type(&self) -> &str {
            self.name
        }

        async fn handle(&self, _record: &CommandRecord, _ctx: &PipelineContext) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panics {
                panic!("handler blew up");
            }
            Ok(())
        }
    }

    fn ctx() -> PipelineContext {
        PipelineContext {
            store: Arc::new(InMemoryCommandStore::new()),
            metrics: Arc::new(NoopMetrics),
            shutdown: ShutdownToken::new(),
        }
    }

    #[test]
    fn test_duplicates_fail_fast_in_order() {
        let handlers: Vec<Arc<dyn RawCommandHandler>> = vec![
            Named::new("b"),
            Named::new("a"),
            Named::new("c"),
            Named::new("a"),
            Named::new("b"),
        ];
        let err = Dispatcher::new(handlers).expect_err("duplicates");
        assert_eq!(
            err.to_string(),
            "Handlers must not contain duplicates. Duplicates: b,a"
        );
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_type() {
        let a = Named::new("a");
        let b = Named::new("b");
        let dispatcher = Dispatcher::new(vec![a.clone(), b.clone()]).expect("dispatcher");

        dispatcher
            .dispatch(&CommandRecord::new("b", "{}", Utc::now()), &ctx())
            .await
            .expect("dispatch");
        dispatcher
            .dispatch(&CommandRecord::new("missing", "{}", Utc::now()), &ctx())
            .await
            .expect("unroutable is not an error");

        assert_eq!(a.calls.load(Ordering::SeqCst), 0);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_worker_survives_panicking_handler() {
        let boom = Arc::new(Named {
            name: "boom",
            calls: AtomicUsize::new(0),
            panics: true,
        });
        let ok = Named::new("ok");
        let dispatcher =
            Arc::new(Dispatcher::new(vec![boom.clone(), ok.clone()]).expect("dispatcher"));
        let ctx = ctx();
        let (tx, rx) = handoff(4);

        tx.push(CommandRecord::new("boom", "{}", Utc::now()), &ctx.shutdown)
            .await
            .expect("push");
        tx.push(CommandRecord::new("ok", "{}", Utc::now()), &ctx.shutdown)
            .await
            .expect("push");
        drop(tx);

        worker_loop("w0".into(), rx, dispatcher, ctx).await;

        assert_eq!(boom.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ok.calls.load(Ordering::SeqCst), 1);
    }
}
