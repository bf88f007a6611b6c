// =============================================================================
// QueueMessage — an at-least-once IPC failover envelope
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub message_id: Uuid,
    #[serde(rename = "type")]
    pub message_type: String,
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
}

impl QueueMessage {
    pub fn new(message_id: Uuid, message_type: &str, payload: serde_json::Value, enqueued_at: DateTime<Utc>) -> Self {
        QueueMessage {
            message_id,
            message_type: message_type.to_string(),
            payload,
            enqueued_at,
            processed: false,
            processed_at: None,
        }
    }
}
