use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::trace;

use crate::command::{CommandId, CommandRecord};
use crate::config::StorageConfig;
use crate::error::Result;
use crate::lease::{lease_deadline, summarize, LeaseSummary};
use crate::persistence::{CommandStore, CommandWriter};

#[derive(Debug, Default)]
struct Table {
    rows: Vec<CommandRecord>,
}

/// Single-process store that keeps the queue table in memory.
///
/// Leasing is a compare-and-swap on `locked_till_utc` performed under one
/// mutex, which gives the same "no two pollers lease one row" guarantee as
/// row locks. Clones share the table and behave like separate store
/// instances over the same database.
#[derive(Clone, Debug)]
pub struct InMemoryCommandStore {
    table: Arc<Mutex<Table>>,
    config: StorageConfig,
    insert_statements: Arc<AtomicUsize>,
}

impl Default for InMemoryCommandStore {
    fn default() -> Self {
        Self {
            table: Arc::default(),
            config: StorageConfig::default(),
            insert_statements: Arc::default(),
        }
    }
}

impl InMemoryCommandStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::default()
        })
    }

    /// Opens a transaction whose inserts stay invisible until commit.
    pub fn begin(&self) -> MemoryTransaction {
        MemoryTransaction {
            table: Arc::clone(&self.table),
            pending: Vec::new(),
        }
    }

    /// Number of insert statements issued so far, one per batch.
    pub fn insert_statements(&self) -> usize {
        self.insert_statements.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.table.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: CommandId) -> Option<CommandRecord> {
        self.table.lock().rows.iter().find(|r| r.id == id).cloned()
    }

    /// Copy of every stored row in insertion order.
    pub fn records(&self) -> Vec<CommandRecord> {
        self.table.lock().rows.clone()
    }
}

/// Buffered writes against an [`InMemoryCommandStore`].
///
/// Dropping the transaction without calling [`commit`](Self::commit)
/// discards its inserts.
#[derive(Debug)]
pub struct MemoryTransaction {
    table: Arc<Mutex<Table>>,
    pending: Vec<CommandRecord>,
}

impl MemoryTransaction {
    pub fn commit(self) {
        if self.pending.is_empty() {
            return;
        }
        let mut table = self.table.lock();
        table.rows.extend(self.pending);
    }

    pub fn rollback(self) {}

    /// Records written in this transaction and not yet committed.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl CommandWriter for InMemoryCommandStore {
    type Transaction = MemoryTransaction;

    async fn create(
        &self,
        tx: &mut MemoryTransaction,
        records: &[CommandRecord],
    ) -> anyhow::Result<()> {
        if !Arc::ptr_eq(&tx.table, &self.table) {
            anyhow::bail!("transaction was opened on a different store");
        }
        if records.is_empty() {
            return Ok(());
        }

        for chunk in records.chunks(self.config.insert_batch_size) {
            self.insert_statements.fetch_add(1, Ordering::SeqCst);
            tx.pending.extend_from_slice(chunk);
        }
        Ok(())
    }
}

#[async_trait]
impl CommandStore for InMemoryCommandStore {
    async fn prefetch(
        &self,
        count: usize,
        lease: Duration,
    ) -> anyhow::Result<Vec<CommandRecord>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let locked_till = lease_deadline(now, lease);

        let mut table = self.table.lock();
        let mut visible: Vec<usize> = table
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.is_visible_at(now))
            .map(|(idx, _)| idx)
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        visible.sort_by_key(|&idx| table.rows[idx].created_at_utc);
        visible.truncate(count);

        let leased: Vec<CommandRecord> = visible
            .into_iter()
            .map(|idx| {
                let row = &mut table.rows[idx];
                row.locked_till_utc = Some(locked_till);
                row.try_count += 1;
                row.clone()
            })
            .collect();

        trace!(leased = leased.len(), "in-memory prefetch");
        Ok(leased)
    }

    async fn delete(&self, id: CommandId) -> anyhow::Result<()> {
        self.table.lock().rows.retain(|row| row.id != id);
        Ok(())
    }

    async fn summary(&self) -> anyhow::Result<Vec<LeaseSummary>> {
        let table = self.table.lock();
        Ok(summarize(&table.rows))
    }
}
