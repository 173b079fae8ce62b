use serde::de::DeserializeOwned;
use serde::Serialize;

/// Turns commands into the opaque string stored in the `Data` column.
///
/// Implementations must be language-agnostic enough for any service that
/// shares the table to read the payload back.
pub trait CommandCodec: Send + Sync + 'static {
    fn encode<C: Serialize>(&self, command: &C) -> anyhow::Result<String>;

    fn decode<C: DeserializeOwned>(&self, data: &str) -> anyhow::Result<C>;
}

/// JSON codec backed by `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl CommandCodec for JsonCodec {
    fn encode<C: Serialize>(&self, command: &C) -> anyhow::Result<String> {
        Ok(serde_json::to_string(command)?)
    }

    fn decode<C: DeserializeOwned>(&self, data: &str) -> anyhow::Result<C> {
        Ok(serde_json::from_str(data)?)
    }
}
