use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::command::{CommandId, CommandRecord};
use crate::config::{PersistenceConfig, StorageConfig};
use crate::lease::{lease_deadline, LeaseSummary};
use crate::persistence::{CommandStore, CommandWriter};

/// PostgreSQL-backed command store.
///
/// Enqueue writes run on the caller's connection or transaction; leasing,
/// deletes and summaries run on the store's own pool.
#[derive(Clone, Debug)]
pub struct PgCommandStore {
    pool: PgPool,
    config: StorageConfig,
}

impl PgCommandStore {
    /// Wrap an existing pool. The table name is validated before use.
    pub fn new(pool: PgPool, config: StorageConfig) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self { pool, config })
    }

    /// Open a pool from `persistence` settings.
    pub async fn connect(
        persistence: &PersistenceConfig,
        config: StorageConfig,
    ) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(persistence.max_connections)
            .min_connections(persistence.min_connections)
            .acquire_timeout(Duration::from_secs(
                persistence.acquire_timeout_seconds,
            ))
            .connect(&persistence.connection_string)
            .await
            .context("failed to connect to postgres")?;
        Ok(Self::new(pool, config)?)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn table_name(&self) -> &str {
        &self.config.table_name
    }

    /// Create the queue table and its ordering index if missing.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        let table = &self.config.table_name;
        let index = format!("ix_{}_createdatutc", table.replace('.', "_"));
        let create_table = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                Id UUID PRIMARY KEY,
                CommandType TEXT NOT NULL,
                Data TEXT NOT NULL,
                CreatedAtUtc TIMESTAMPTZ NOT NULL,
                LockedTillUtc TIMESTAMPTZ NULL,
                TryCount INTEGER NOT NULL DEFAULT 0
            )
            "#
        );
        let create_index =
            format!("CREATE INDEX IF NOT EXISTS {index} ON {table} (CreatedAtUtc)");

        self.bounded(sqlx::query(&create_table).execute(&self.pool))
            .await?;
        self.bounded(sqlx::query(&create_index).execute(&self.pool))
            .await?;
        debug!(table = %table, "queue table ready");
        Ok(())
    }

    async fn bounded<T, F>(&self, fut: F) -> anyhow::Result<T>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.config.command_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(anyhow::anyhow!(
                "storage command on {} timed out after {:?}",
                self.config.table_name,
                self.config.command_timeout
            )),
        }
    }
}

#[async_trait]
impl CommandWriter for PgCommandStore {
    type Transaction = PgConnection;

    async fn create(
        &self,
        tx: &mut PgConnection,
        records: &[CommandRecord],
    ) -> anyhow::Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        for chunk in records.chunks(self.config.insert_batch_size) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} (Id, CommandType, Data, CreatedAtUtc) ",
                self.config.table_name
            ));
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(record.id.0)
                    .push_bind(record.command_type.clone())
                    .push_bind(record.data.clone())
                    .push_bind(record.created_at_utc);
            });
            self.bounded(builder.build().execute(&mut *tx)).await?;
        }

        trace!(count = records.len(), "commands written");
        Ok(())
    }
}

#[async_trait]
impl CommandStore for PgCommandStore {
    async fn prefetch(
        &self,
        count: usize,
        lease: Duration,
    ) -> anyhow::Result<Vec<CommandRecord>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(count).unwrap_or(i64::MAX);
        let locked_till = lease_deadline(Utc::now(), lease);
        let table = &self.config.table_name;

        let mut tx = self.bounded(self.pool.begin()).await?;

        let select = format!(
            r#"
            SELECT Id, CommandType, Data, CreatedAtUtc, TryCount + 1 AS TryCount
            FROM {table}
            WHERE LockedTillUtc IS NULL OR LockedTillUtc < NOW()
            ORDER BY CreatedAtUtc
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#
        );
        let rows = self
            .bounded(sqlx::query(&select).bind(limit).fetch_all(&mut *tx))
            .await?;

        if rows.is_empty() {
            self.bounded(tx.rollback()).await?;
            return Ok(Vec::new());
        }

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.try_get("id")?;
            let created_at_utc: DateTime<Utc> = row.try_get("createdatutc")?;
            records.push(CommandRecord {
                id: CommandId(id),
                command_type: row.try_get("commandtype")?,
                data: row.try_get("data")?,
                created_at_utc,
                locked_till_utc: Some(locked_till),
                try_count: row.try_get("trycount")?,
            });
        }

        let ids: Vec<Uuid> = records.iter().map(|r| r.id.0).collect();
        let update = format!(
            r#"
            UPDATE {table}
            SET LockedTillUtc = $1, TryCount = TryCount + 1
            WHERE Id = ANY($2)
            "#
        );
        self.bounded(
            sqlx::query(&update)
                .bind(locked_till)
                .bind(&ids)
                .execute(&mut *tx),
        )
        .await?;

        self.bounded(tx.commit()).await?;
        trace!(leased = records.len(), "postgres prefetch");
        Ok(records)
    }

    async fn delete(&self, id: CommandId) -> anyhow::Result<()> {
        let sql = format!("DELETE FROM {} WHERE Id = $1", self.config.table_name);
        self.bounded(sqlx::query(&sql).bind(id.0).execute(&self.pool))
            .await?;
        Ok(())
    }

    async fn summary(&self) -> anyhow::Result<Vec<LeaseSummary>> {
        let sql = format!(
            r#"
            SELECT CommandType, COUNT(*) AS Count, MAX(TryCount) AS MaxTryCount
            FROM {}
            GROUP BY CommandType
            ORDER BY CommandType
            "#,
            self.config.table_name
        );
        let rows = self
            .bounded(sqlx::query(&sql).fetch_all(&self.pool))
            .await?;

        rows.into_iter()
            .map(|row| -> anyhow::Result<LeaseSummary> {
                let max_try_count: Option<i32> = row.try_get("maxtrycount")?;
                Ok(LeaseSummary {
                    command_type: row.try_get("commandtype")?,
                    count: row.try_get("count")?,
                    max_try_count: max_try_count.unwrap_or_default(),
                })
            })
            .collect()
    }
}
