use async_trait::async_trait;
use localq::{CommandId, CommandRecord, CommandStore, InMemoryCommandStore, LeaseSummary};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct FlakyState {
    prefetch_failures: usize,
    delete_failures: usize,
    prefetch_calls: usize,
    deleted: Vec<CommandId>,
}

/// [`InMemoryCommandStore`] wrapper that counts calls and injects failures.
#[derive(Clone)]
pub struct FlakyStore {
    inner: InMemoryCommandStore,
    state: Arc<Mutex<FlakyState>>,
}

impl FlakyStore {
    pub fn new(inner: InMemoryCommandStore) -> Self {
        Self {
            inner,
            state: Arc::new(Mutex::new(FlakyState::default())),
        }
    }

    pub fn inner(&self) -> &InMemoryCommandStore {
        &self.inner
    }

    /// Make the next `n` prefetch calls fail.
    pub fn fail_next_prefetches(&self, n: usize) {
        self.state.lock().prefetch_failures = n;
    }

    /// Make the next `n` delete calls fail.
    pub fn fail_next_deletes(&self, n: usize) {
        self.state.lock().delete_failures = n;
    }

    pub fn prefetch_calls(&self) -> usize {
        self.state.lock().prefetch_calls
    }

    /// Ids passed to successful deletes, in call order.
    pub fn deleted(&self) -> Vec<CommandId> {
        self.state.lock().deleted.clone()
    }
}

#[async_trait]
impl CommandStore for FlakyStore {
    async fn prefetch(
        &self,
        count: usize,
        lease: Duration,
    ) -> anyhow::Result<Vec<CommandRecord>> {
        {
            let mut state = self.state.lock();
            state.prefetch_calls += 1;
            if state.prefetch_failures > 0 {
                state.prefetch_failures -= 1;
                anyhow::bail!("injected prefetch failure");
            }
        }
        self.inner.prefetch(count, lease).await
    }

    async fn delete(&self, id: CommandId) -> anyhow::Result<()> {
        {
            let mut state = self.state.lock();
            if state.delete_failures > 0 {
                state.delete_failures -= 1;
                anyhow::bail!("injected delete failure");
            }
        }
        self.inner.delete(id).await?;
        self.state.lock().deleted.push(id);
        Ok(())
    }

    async fn summary(&self) -> anyhow::Result<Vec<LeaseSummary>> {
        self.inner.summary().await
    }
}
