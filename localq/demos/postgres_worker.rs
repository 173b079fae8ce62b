//! PostgreSQL runtime example.
//!
//! Writes a business row and its follow-up command in one transaction, then
//! processes the command with a runtime polling the same table. Start several
//! copies to watch leases spread the work across processes.
//!
//! # Running the Example
//!
//! ```bash
//! export DATABASE_URL="postgres://localhost/localq_example"
//! cargo run --example postgres_worker --features postgres,metrics
//! ```

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use localq::*;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ShipOrder {
    order_id: i64,
}

impl Command for ShipOrder {
    fn command_type() -> &'static str {
        "demo.ShipOrder"
    }
}

struct ShipOrderHandler;

#[async_trait]
impl CommandHandler<ShipOrder> for ShipOrderHandler {
    async fn handle(&self, command: &ShipOrder, shutdown: &ShutdownToken) -> anyhow::Result<()> {
        // Stand-in for a carrier API call.
        shutdown.sleep(Duration::from_millis(100)).await?;
        tracing::info!(order_id = command.order_id, pid = std::process::id(), "order shipped");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let database_url = env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/localq_example".to_string());

    let store = PgCommandStore::connect(
        &PersistenceConfig::new(database_url),
        StorageConfig::default().with_table_name("demo_commands"),
    )
    .await?;
    store.ensure_schema().await?;

    sqlx::query("CREATE TABLE IF NOT EXISTS demo_orders (Id BIGINT PRIMARY KEY, State TEXT NOT NULL)")
        .execute(store.pool())
        .await?;

    let queue = CommandQueue::new(store.clone());
    let mut tx = store.pool().begin().await?;
    let order_id = chrono::Utc::now().timestamp_millis();
    sqlx::query("INSERT INTO demo_orders (Id, State) VALUES ($1, 'paid')")
        .bind(order_id)
        .execute(&mut *tx)
        .await?;
    queue.enqueue_one(&mut *tx, ShipOrder { order_id }).await?;
    tx.commit().await?;

    let runtime = CommandRuntimeBuilder::new()
        .with_store(store.clone())
        .with_metrics(PrometheusMetrics::new()?)
        .with_config(
            ProcessingConfig::default()
                .with_workers_count(4)
                .with_summary_interval(Duration::from_secs(5)),
        )
        .register::<ShipOrder, _>(ShipOrderHandler)
        .build()?;

    runtime.start().await?;
    tracing::info!("runtime started, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    runtime.shutdown().await?;

    println!("{}", localq::metrics::gather_metrics()?);
    Ok(())
}
