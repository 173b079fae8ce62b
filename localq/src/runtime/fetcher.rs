use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, Instrument};

use crate::config::ProcessingConfig;
use crate::error::Error;
use crate::persistence::CommandStore;
use crate::runtime::{HandoffSender, ShutdownToken};
use crate::telemetry::command_fetch_span;

/// Single producer leasing batches from the store into the hand-off queue.
pub struct FetchLoop {
    store: Arc<dyn CommandStore>,
    sender: HandoffSender,
    prefetch_count: usize,
    invisibility_timeout: Duration,
    idle_timeout: Duration,
    shutdown: ShutdownToken,
}

impl FetchLoop {
    pub fn new(
        store: Arc<dyn CommandStore>,
        sender: HandoffSender,
        config: &ProcessingConfig,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            store,
            sender,
            prefetch_count: config.prefetch_count,
            invisibility_timeout: config.invisibility_timeout,
            idle_timeout: config.idle_timeout,
            shutdown,
        }
    }

    /// Run until the shutdown token fires.
    pub async fn run(self) {
        debug!(prefetch_count = self.prefetch_count, "fetch loop started");
        while let Ok(fetched) = self.cycle().await {
            if fetched == 0 && self.shutdown.sleep(self.idle_timeout).await.is_err() {
                break;
            }
        }
        info!("Fetch loop shutting down");
    }

    /// One prefetch and hand-off. Returns how many records were handed off.
    ///
    /// Storage errors are logged and count as an empty batch; only
    /// cancellation ends the cycle with an error.
    pub async fn cycle(&self) -> Result<usize, Error> {
        self.sender.wait_for_capacity(&self.shutdown).await?;

        let prefetch = self
            .store
            .prefetch(self.prefetch_count, self.invisibility_timeout)
            .instrument(command_fetch_span(self.prefetch_count));
        let fetched = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(Error::Cancelled),
            fetched = prefetch => fetched,
        };

        let records = match fetched {
            Ok(records) => records,
            Err(err) => {
                error!(error = %err, "Failed to fetch commands");
                return Ok(0);
            }
        };

        let count = records.len();
        for record in records {
            self.sender.push(record, &self.shutdown).await?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandRecord;
    use crate::persistence::{CommandWriter, InMemoryCommandStore};
    use crate::runtime::handoff;
    use chrono::Utc;

    async fn seeded(n: usize) -> InMemoryCommandStore {
        let store = InMemoryCommandStore::new();
        let records: Vec<_> = (0..n)
            .map(|i| {
                CommandRecord::new(
                    "t",
                    "{}",
                    Utc::now() + chrono::Duration::milliseconds(i as i64),
                )
            })
            .collect();
        let mut tx = store.begin();
        store.create(&mut tx, &records).await.expect("create");
        tx.commit();
        store
    }

    #[tokio::test]
    async fn test_cycle_hands_off_batch() {
        let store = seeded(3).await;
        let shutdown = ShutdownToken::new();
        let (tx, rx) = handoff(10);
        let config = ProcessingConfig::default().with_prefetch_count(2);
        let fetch = FetchLoop::new(Arc::new(store.clone()), tx, &config, shutdown.clone());

        assert_eq!(fetch.cycle().await.expect("cycle"), 2);
        assert_eq!(fetch.cycle().await.expect("cycle"), 1);
        assert_eq!(fetch.cycle().await.expect("cycle"), 0);

        for _ in 0..3 {
            let record = rx.pop(&shutdown).await.expect("pop").expect("record");
            assert_eq!(record.try_count, 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_during_idle_sleep() {
        let store = InMemoryCommandStore::new();
        let shutdown = ShutdownToken::new();
        let (tx, _rx) = handoff(10);
        let config = ProcessingConfig::default().with_idle_timeout(Duration::from_secs(3600));
        let fetch = FetchLoop::new(Arc::new(store), tx, &config, shutdown.clone());

        let task = tokio::spawn(fetch.run());
        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("loop should stop promptly")
            .expect("task");
    }
}
