use poem_openapi::Object;
use uuid::Uuid;

use crate::presentation::models::{BreakerStateDto, OutboxStatusDto};

#[derive(Object)]
pub struct OutboxEventDto {
    pub id: Uuid,
    #[oai(rename = "type")]
    pub event_type: String,
    pub version: String,
    pub aggregate_id: Option<String>,
    pub payload: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
    pub status: OutboxStatusDto,
    pub attempts: u32,
    pub error_message: Option<String>,
    pub processed_at: Option<String>,
    pub last_attempt_at: Option<String>,
    pub next_attempt_at: String,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Object)]
pub struct PaginatedEventsDto {
    pub events: Vec<OutboxEventDto>,
    pub has_more: bool,
    pub next_offset: Option<u32>,
}

#[derive(Object)]
pub struct BacklogDto {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Object)]
pub struct RelayTotalsDto {
    pub claimed: u64,
    pub completed: u64,
    pub retried: u64,
    pub failed: u64,
    pub skipped: u64,
    pub released: u64,
    pub lost: u64,
    pub expired: u64,
}

#[derive(Object)]
pub struct RelayHealthDto {
    pub running: bool,
    pub cycles: u64,
    pub last_cycle_at: Option<String>,
    pub last_error: Option<String>,
    pub last_error_at: Option<String>,
    pub breaker_state: BreakerStateDto,
    pub broker_connected: bool,
    pub backlog: BacklogDto,
    pub totals: RelayTotalsDto,
}
