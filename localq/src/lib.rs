//! localq - Transactional local command queue.
//!
//! Commands are written into a queue table inside the caller's own database
//! transaction, so they persist atomically with the business change that
//! produced them. A background runtime leases batches of those rows, hands
//! them to a pool of workers, runs the handler registered for each command
//! type and deletes the row once the handler succeeds. Several processes may
//! poll the same table; leases keep them from running a command concurrently.
//!
//! # Core Concepts
//!
//! - **Command**: A serializable payload implementing [`Command`]. Its
//!   [`Command::command_type`] is the routing key stored next to the payload.
//!
//! - **Enqueue**: [`CommandQueue`] serializes commands and appends them through a
//!   [`CommandWriter`] on a transaction the caller owns and commits.
//!
//! - **Lease**: [`CommandStore::prefetch`] atomically claims visible rows until
//!   `now + lease_timeout` and bumps their try count. A record whose lease has
//!   run out becomes visible again, giving at-least-once delivery.
//!
//! - **Pipeline**: [`CommandPipeline`] decodes a record, runs its
//!   [`CommandHandler`] under a [`RetryPolicy`] and deletes the row on success.
//!
//! - **Runtime**: [`CommandRuntime`] ties the fetch loop, the bounded hand-off
//!   queue, the worker pool and the summary reporter together. Build one with
//!   [`CommandRuntimeBuilder`].
//!
//! # Feature Flags
//!
//! - `postgres` - PostgreSQL store via sqlx
//! - `metrics` - Prometheus metrics sink
//!
//! # Example
//!
//! ```ignore
//! use localq::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct SendInvoice {
//!     order_id: u64,
//! }
//!
//! impl Command for SendInvoice {
//!     fn command_type() -> &'static str {
//!         "billing.SendInvoice"
//!     }
//! }
//!
//! let queue = CommandQueue::new(store.clone());
//! let mut tx = store.begin();
//! queue.enqueue_one(&mut tx, SendInvoice { order_id: 7 }).await?;
//! tx.commit();
//!
//! let runtime = CommandRuntimeBuilder::new()
//!     .with_store(store)
//!     .register::<SendInvoice, _>(handler_fn(|cmd: SendInvoice, _| async move {
//!         println!("invoice for {}", cmd.order_id);
//!         Ok(())
//!     }))
//!     .build()?;
//! runtime.start().await?;
//! ```

/// Payload encoding for stored commands.
///
/// [`CommandCodec`] turns typed commands into the text stored in the `Data`
/// column; [`JsonCodec`] is the default.
pub mod codec;

/// Command trait, identifiers and the stored record.
pub mod command;

/// Configuration structures for storage and processing.
///
/// The `config` module defines [`PersistenceConfig`], [`StorageConfig`],
/// [`ProcessingConfig`] and [`RetryPolicyConfig`].
pub mod config;

/// Typed error outcomes.
pub mod error;

/// Typed handlers and the per-type processing pipeline.
///
/// - [`CommandHandler`] - user code for one command type
/// - [`handler_fn`] - adapt an async closure into a handler
/// - [`RawCommandHandler`] - type-erased pipeline the dispatcher routes to
/// - [`CommandPipeline`] - decode, retry, delete and record metrics
pub mod handler;

/// Lease arithmetic and storage summaries.
pub mod lease;

#[cfg(feature = "metrics")]
/// Prometheus metrics for the command runtime.
///
/// The `metrics` module registers queue length, try count, processing time
/// and lag collectors when the `metrics` feature is enabled.
pub mod metrics;

/// Command stores.
///
/// The `persistence` module defines the [`CommandStore`] and [`CommandWriter`]
/// seams, an in-memory store and, with the `postgres` feature, a
/// PostgreSQL store.
pub mod persistence;

/// Enqueue path.
pub mod queue;

/// Bounded retry with fixed backoff.
pub mod retry;

/// Runtime orchestration and worker management.
///
/// The `runtime` module provides the [`CommandRuntime`] and the pieces it
/// is made of:
/// - [`FetchLoop`] - leases batches into the hand-off queue
/// - [`handoff`] - bounded queue between the fetch loop and workers
/// - [`Dispatcher`] and [`worker_loop`] - route records to pipelines
/// - [`SummaryReporter`] - periodic storage summary sampling
/// - [`ShutdownToken`] - graceful shutdown signaling
pub mod runtime;

/// Tracing spans and the metrics seam.
pub mod telemetry;

pub use codec::*;
pub use command::*;
pub use config::*;
pub use error::{Error, Result};
pub use handler::*;
pub use lease::*;
#[cfg(feature = "metrics")]
pub use metrics::PrometheusMetrics;
pub use persistence::*;
pub use queue::*;
pub use retry::*;
pub use runtime::{
    handoff, worker_loop, CommandRuntime, CommandRuntimeBuilder, Dispatcher, FetchLoop,
    HandoffReceiver, HandoffSender, ShutdownToken, SummaryReporter,
};
pub use telemetry::*;
