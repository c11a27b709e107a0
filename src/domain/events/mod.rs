use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::models::OutboxEvent;

/// Wire envelope published to the broker. `id` doubles as the dedup key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerMessage {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate_id: Option<String>,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub occurred_at: DateTime<Utc>,
}

impl From<&OutboxEvent> for BrokerMessage {
    fn from(event: &OutboxEvent) -> Self {
        Self {
            id: event.id,
            event_type: event.event_type.clone(),
            version: event.version.clone(),
            aggregate_id: event.aggregate_id.clone(),
            payload: event.payload.clone(),
            metadata: event.metadata.clone(),
            occurred_at: event.created_at,
        }
    }
}

impl BrokerMessage {
    /// Broker partition key: the aggregate when there is one, else the event id.
    pub fn partition_key(&self) -> String {
        self.aggregate_id
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }
}
