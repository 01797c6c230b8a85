//! Serialization of the session attribute map.

use std::fmt;
use std::sync::Arc;

use satchel_config::SerializerKind;

use crate::SessionData;
use crate::error::Result;

/// Turns a session attribute map into bytes and back.
pub trait Serializer: Send + Sync + fmt::Debug {
    /// Serialize a session attribute map.
    fn dumps(&self, data: &SessionData) -> Result<Vec<u8>>;

    /// Deserialize a session attribute map.
    fn loads(&self, bytes: &[u8]) -> Result<SessionData>;
}

/// Compact JSON via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn dumps(&self, data: &SessionData) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(data)?)
    }

    fn loads(&self, bytes: &[u8]) -> Result<SessionData> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Serializer selected by configuration.
pub fn serializer_for(kind: SerializerKind) -> Arc<dyn Serializer> {
    match kind {
        SerializerKind::Json => Arc::new(JsonSerializer),
    }
}
