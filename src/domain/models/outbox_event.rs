use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::errors::UnknownStatus;

/// Lifecycle of an outbox row.
///
/// `Pending -> Processing -> {Completed | Pending | Failed}`. Only the relay
/// moves rows out of `Processing`, and only while it holds the claim.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processing => "processing",
            OutboxStatus::Completed => "completed",
            OutboxStatus::Failed => "failed",
        }
    }

    /// Transitions the relay is allowed to make.
    pub fn can_transition_to(&self, next: OutboxStatus) -> bool {
        matches!(
            (self, next),
            (OutboxStatus::Pending, OutboxStatus::Processing)
                | (OutboxStatus::Processing, OutboxStatus::Processing)
                | (OutboxStatus::Processing, OutboxStatus::Completed)
                | (OutboxStatus::Processing, OutboxStatus::Pending)
                | (OutboxStatus::Processing, OutboxStatus::Failed)
        )
    }
}

impl FromStr for OutboxStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(OutboxStatus::Pending),
            "processing" => Ok(OutboxStatus::Processing),
            "completed" => Ok(OutboxStatus::Completed),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Event as written by business logic, before it has a status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOutboxEvent {
    pub id: Uuid,
    pub event_type: String,
    pub version: String,
    pub aggregate_id: Option<String>,
    pub payload: Value,
    pub metadata: Option<Value>,
}

impl NewOutboxEvent {
    pub fn new(event_type: impl Into<String>, version: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            version: version.into(),
            aggregate_id: None,
            payload,
            metadata: None,
        }
    }

    pub fn with_aggregate_id(mut self, aggregate_id: impl Into<String>) -> Self {
        self.aggregate_id = Some(aggregate_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Materializes the row exactly as the store persists it on insert.
    pub fn into_pending(self, now: DateTime<Utc>) -> OutboxEvent {
        OutboxEvent {
            id: self.id,
            event_type: self.event_type,
            version: self.version,
            aggregate_id: self.aggregate_id,
            payload: self.payload,
            metadata: self.metadata,
            status: OutboxStatus::Pending,
            attempts: 0,
            error_message: None,
            processed_at: None,
            last_attempt_at: None,
            next_attempt_at: now,
            claimed_at: None,
            claim_token: None,
            claimed_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub event_type: String,
    pub version: String,
    pub aggregate_id: Option<String>,
    pub payload: Value,
    pub metadata: Option<Value>,
    pub status: OutboxStatus,
    /// Recorded failed publish attempts. Never decreases.
    pub attempts: u32,
    pub error_message: Option<String>,
    /// Set if and only if `status == Completed`.
    pub processed_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// A `Pending` row is not claimable before this instant.
    pub next_attempt_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub claim_token: Option<Uuid>,
    pub claimed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxEvent {
    /// Whether `claim_batch` may pick this row up at `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>, stale_before: DateTime<Utc>) -> bool {
        match self.status {
            OutboxStatus::Pending => self.next_attempt_at <= now,
            OutboxStatus::Processing => self.claimed_at.is_none_or(|at| at < stale_before),
            OutboxStatus::Completed | OutboxStatus::Failed => false,
        }
    }

    pub fn is_held_by(&self, claim: &Claim) -> bool {
        self.status == OutboxStatus::Processing && self.claim_token == Some(claim.token)
    }
}

/// Ownership proof handed out by `claim_batch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub event_id: Uuid,
    pub token: Uuid,
}

impl Claim {
    pub fn of(event: &OutboxEvent) -> Option<Self> {
        event.claim_token.map(|token| Claim {
            event_id: event.id,
            token,
        })
    }
}

/// How a failed attempt should be recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Back to `Pending`, due again at the given instant.
    RetryAt(DateTime<Utc>),
    /// Terminal `Failed`.
    Exhausted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}
