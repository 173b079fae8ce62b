use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::command::{CommandId, CommandRecord};
use crate::lease::LeaseSummary;

/// In-memory store sharing the leasing contract of the database stores.
pub mod memory;

/// PostgreSQL-backed store.
///
/// Leasing uses `SELECT ... FOR UPDATE SKIP LOCKED` so several processes can
/// poll one table without blocking each other.
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{InMemoryCommandStore, MemoryTransaction};
#[cfg(feature = "postgres")]
pub use postgres::PgCommandStore;

/// The side of the queue table the processing engine talks to.
#[async_trait]
pub trait CommandStore: Send + Sync {
    /// Atomically leases up to `count` visible records, oldest first.
    ///
    /// Rows being leased by a concurrent prefetch are skipped, never waited
    /// on. Returned records carry the new `locked_till_utc` and `try_count`.
    async fn prefetch(
        &self,
        count: usize,
        lease: Duration,
    ) -> anyhow::Result<Vec<CommandRecord>>;

    /// Removes a record. Deleting a missing id is not an error.
    async fn delete(&self, id: CommandId) -> anyhow::Result<()>;

    /// Pending count and highest try count per command type.
    async fn summary(&self) -> anyhow::Result<Vec<LeaseSummary>>;
}

/// The side of the queue table the enqueue path talks to.
///
/// Writes go through a transaction owned by the caller so commands commit
/// or roll back together with the business change that produced them.
#[async_trait]
pub trait CommandWriter: Send + Sync {
    type Transaction: Send;

    /// Appends `records` without starting or committing a transaction.
    async fn create(
        &self,
        tx: &mut Self::Transaction,
        records: &[CommandRecord],
    ) -> anyhow::Result<()>;
}

#[async_trait]
impl<S: CommandStore + ?Sized> CommandStore for Arc<S> {
    async fn prefetch(
        &self,
        count: usize,
        lease: Duration,
    ) -> anyhow::Result<Vec<CommandRecord>> {
        (**self).prefetch(count, lease).await
    }

    async fn delete(&self, id: CommandId) -> anyhow::Result<()> {
        (**self).delete(id).await
    }

    async fn summary(&self) -> anyhow::Result<Vec<LeaseSummary>> {
        (**self).summary().await
    }
}

#[async_trait]
impl<W: CommandWriter + ?Sized> CommandWriter for Arc<W> {
    type Transaction = W::Transaction;

    async fn create(
        &self,
        tx: &mut Self::Transaction,
        records: &[CommandRecord],
    ) -> anyhow::Result<()> {
        (**self).create(tx, records).await
    }
}
