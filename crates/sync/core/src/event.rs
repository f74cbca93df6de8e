//! Minimal signed-event model.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::storage::Item;
use crate::EventId;

/// A signed event as returned by the fetch pipeline. Signature verification
/// belongs to the caller's event stack, not to the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl Event {
    /// The event id as raw bytes.
    pub fn id_bytes(&self) -> Result<EventId> {
        let bytes = hex::decode(&self.id).map_err(|e| ProtocolError::InvalidHex(e.to_string()))?;
        EventId::try_from(bytes.as_slice())
            .map_err(|_| ProtocolError::InvalidHex(format!("event id is {} bytes", bytes.len())))
    }

    /// The storage item describing this event.
    pub fn item(&self) -> Result<Item> {
        Ok(Item::new(self.created_at, self.id_bytes()?))
    }
}
