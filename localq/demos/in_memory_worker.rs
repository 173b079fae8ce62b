//! In-memory runtime example.
//!
//! Enqueues a few commands inside a transaction, runs the runtime until the
//! store drains and shuts down. One command type fails twice before it
//! succeeds to show retries within a lease.
//!
//! ```bash
//! RUST_LOG=localq=debug cargo run --example in_memory_worker
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use localq::*;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SendWelcomeEmail {
    user_id: u64,
    address: String,
}

impl Command for SendWelcomeEmail {
    fn command_type() -> &'static str {
        "demo.SendWelcomeEmail"
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct RebuildReport {
    report: String,
}

impl Command for RebuildReport {
    fn command_type() -> &'static str {
        "demo.RebuildReport"
    }
}

/// Fails the first two attempts of every report.
#[derive(Default)]
struct ReportBuilder {
    attempts: AtomicUsize,
}

#[async_trait]
impl CommandHandler<RebuildReport> for ReportBuilder {
    async fn handle(&self, command: &RebuildReport, shutdown: &ShutdownToken) -> anyhow::Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= 2 {
            anyhow::bail!("report store busy (attempt {})", attempt);
        }
        shutdown.sleep(Duration::from_millis(50)).await?;
        tracing::info!(report = %command.report, "report rebuilt");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let store = InMemoryCommandStore::new();
    let queue = CommandQueue::new(store.clone());

    let mut tx = store.begin();
    queue
        .enqueue(
            &mut tx,
            (1..=5).map(|user_id| SendWelcomeEmail {
                user_id,
                address: format!("user{}@example.com", user_id),
            }),
        )
        .await?;
    queue
        .enqueue_one(&mut tx, RebuildReport { report: "daily-signups".into() })
        .await?;
    tx.commit();
    tracing::info!(pending = store.len(), "commands committed");

    let config = ProcessingConfig::default()
        .with_workers_count(3)
        .with_idle_timeout(Duration::from_millis(200))
        .with_retry(
            RebuildReport::command_type(),
            RetryPolicyConfig::default().with_backoff_interval(Duration::from_millis(100)),
        );

    let runtime = CommandRuntimeBuilder::new()
        .with_store(store.clone())
        .with_config(config)
        .register::<SendWelcomeEmail, _>(handler_fn(
            |command: SendWelcomeEmail, _shutdown: ShutdownToken| async move {
                tracing::info!(user_id = command.user_id, address = %command.address, "welcome email sent");
                Ok::<(), anyhow::Error>(())
            },
        ))
        .register::<RebuildReport, _>(Arc::new(ReportBuilder::default()))
        .build()?;

    runtime.start().await?;

    while !store.is_empty() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    runtime.shutdown().await?;
    tracing::info!("all commands processed");
    Ok(())
}
