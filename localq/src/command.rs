use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use uuid::Uuid;

/// A payload that can travel through the queue.
///
/// The routing key defaults to the Rust type name. Override
/// [`Command::command_type`] when records must survive a type being moved
/// or renamed, or when several services share one table.
pub trait Command: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn command_type() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Unique, immutable identifier of a stored command.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct CommandId(pub Uuid);

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The 16-byte storage form.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CommandId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// One row of the queue table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    /// Assigned at enqueue time, never changes.
    pub id: CommandId,
    /// Routing key.
    pub command_type: String,
    /// Serialized payload.
    pub data: String,
    /// Enqueue time; orders records inside a prefetch batch.
    pub created_at_utc: DateTime<Utc>,
    /// `None` until first leased.
    pub locked_till_utc: Option<DateTime<Utc>>,
    /// Number of lease acquisitions.
    pub try_count: i32,
}

impl CommandRecord {
    /// Builds an unleased record ready to be written.
    pub fn new(
        command_type: impl Into<String>,
        data: impl Into<String>,
        created_at_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CommandId::new(),
            command_type: command_type.into(),
            data: data.into(),
            created_at_utc,
            locked_till_utc: None,
            try_count: 0,
        }
    }

    /// True once `now` has reached the lease deadline.
    ///
    /// A record that was never leased has no deadline to reach.
    pub fn is_lock_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_till_utc.is_some_and(|till| till <= now)
    }

    pub fn is_lock_expired(&self) -> bool {
        self.is_lock_expired_at(Utc::now())
    }

    /// Visible to prefetch: never leased, or lease in the past.
    pub fn is_visible_at(&self, now: DateTime<Utc>) -> bool {
        match self.locked_till_utc {
            None => true,
            Some(till) => till < now,
        }
    }
}
