use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::command::CommandRecord;
use crate::error::{Error, Result};
use crate::runtime::ShutdownToken;

/// Create a bounded hand-off queue between the fetch loop and workers.
///
/// A full queue blocks the producer, which in turn stops the fetch loop
/// from leasing more work than the workers can take.
pub fn handoff(capacity: usize) -> (HandoffSender, HandoffReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        HandoffSender { tx },
        HandoffReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Producer half, owned by the fetch loop.
#[derive(Debug)]
pub struct HandoffSender {
    tx: mpsc::Sender<CommandRecord>,
}

impl HandoffSender {
    /// Wait until at least one slot is free.
    ///
    /// A closed queue reports [`Error::Cancelled`]: every consumer is gone.
    pub async fn wait_for_capacity(&self, shutdown: &ShutdownToken) -> Result<()> {
        tokio::select! {
            _ = shutdown.cancelled() => Err(Error::Cancelled),
            permit = self.tx.reserve() => permit.map(drop).map_err(|_| Error::Cancelled),
        }
    }

    /// Push one record, waiting while the queue is full.
    pub async fn push(&self, record: CommandRecord, shutdown: &ShutdownToken) -> Result<()> {
        tokio::select! {
            _ = shutdown.cancelled() => Err(Error::Cancelled),
            sent = self.tx.send(record) => sent.map_err(|_| Error::Cancelled),
        }
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }
}

/// Consumer half, cloned into every worker.
#[derive(Clone, Debug)]
pub struct HandoffReceiver {
    rx: Arc<Mutex<mpsc::Receiver<CommandRecord>>>,
}

impl HandoffReceiver {
    /// Take the next record.
    ///
    /// Returns `Ok(None)` once the producer is gone and the queue drained.
    pub async fn pop(&self, shutdown: &ShutdownToken) -> Result<Option<CommandRecord>> {
        tokio::select! {
            _ = shutdown.cancelled() => Err(Error::Cancelled),
            record = async { self.rx.lock().await.recv().await } => Ok(record),
        }
    }
}
