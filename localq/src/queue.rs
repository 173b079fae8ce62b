use chrono::{Duration, Utc};
use tracing::debug;

use crate::codec::{CommandCodec, JsonCodec};
use crate::command::{Command, CommandId, CommandRecord};
use crate::persistence::CommandWriter;

/// Enqueue side of the queue.
///
/// Commands are written through the caller's transaction, so they become
/// visible to workers only if the surrounding business change commits.
///
/// ```ignore
/// let mut tx = pool.begin().await?;
/// sqlx::query("UPDATE orders SET state = 'paid' WHERE id = $1")
///     .bind(order_id)
///     .execute(&mut *tx)
///     .await?;
/// queue.enqueue(&mut tx, [ShipOrder { order_id }]).await?;
/// tx.commit().await?;
/// ```
#[derive(Clone, Debug)]
pub struct CommandQueue<W, K = JsonCodec> {
    writer: W,
    codec: K,
}

impl<W: CommandWriter> CommandQueue<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            codec: JsonCodec,
        }
    }
}

impl<W, K> CommandQueue<W, K>
where
    W: CommandWriter,
    K: CommandCodec,
{
    pub fn with_codec(writer: W, codec: K) -> Self {
        Self { writer, codec }
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Serialize `commands` and append them within `tx`.
    ///
    /// Returns the new ids in input order. An empty input writes nothing.
    pub async fn enqueue<C: Command>(
        &self,
        tx: &mut W::Transaction,
        commands: impl IntoIterator<Item = C>,
    ) -> anyhow::Result<Vec<CommandId>> {
        let now = Utc::now();
        let records = commands
            .into_iter()
            .enumerate()
            .map(|(i, command)| {
                let data = self.codec.encode(&command)?;
                // Strictly increasing timestamps keep batch order under
                // ORDER BY CreatedAtUtc.
                let created_at = now + Duration::microseconds(i as i64);
                Ok(CommandRecord::new(C::command_type(), data, created_at))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        if records.is_empty() {
            return Ok(Vec::new());
        }

        self.writer.create(tx, &records).await?;
        debug!(
            command_type = C::command_type(),
            count = records.len(),
            "commands enqueued"
        );
        Ok(records.into_iter().map(|r| r.id).collect())
    }

    /// Enqueue a single command.
    pub async fn enqueue_one<C: Command>(
        &self,
        tx: &mut W::Transaction,
        command: C,
    ) -> anyhow::Result<CommandId> {
        let ids = self.enqueue(tx, std::iter::once(command)).await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("enqueue returned no id"))
    }
}
