//! The storage record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical, storage-agnostic representation of a message.
///
/// `version` and `global_position` are assigned by the repository on write.
/// Values set by the client are ignored. `version` counts from 0 within
/// `stream_name`; `global_position` increases without gaps across the whole
/// store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub id: Uuid,
    /// Present only for entity-scoped streams.
    pub entity_id: Option<Uuid>,
    pub stream_name: String,
    pub stream_category: String,
    pub message_type: String,
    pub version: i64,
    pub global_position: i64,
    /// JSON-encoded payload.
    pub data: Vec<u8>,
    /// JSON-encoded metadata. May be empty.
    pub metadata: Vec<u8>,
    pub time: DateTime<Utc>,
}
