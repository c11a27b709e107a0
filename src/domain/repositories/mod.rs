use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    errors::PersistenceError,
    models::{Claim, FailureDisposition, NewOutboxEvent, OutboxEvent, OutboxStatus, StatusCounts},
};

pub type StoreResult<T> = Result<T, PersistenceError>;

/// Durable outbox table shared by business writers and relay workers.
///
/// Every mutation after `claim_batch` is conditioned on the caller still
/// holding the claim; a mismatch yields `PersistenceError::ClaimLost`.
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    async fn insert(&self, event: NewOutboxEvent) -> StoreResult<OutboxEvent>;

    /// Atomically moves up to `limit` claimable rows to `processing`, oldest
    /// first. Rows in `processing` claimed before `stale_before` count as
    /// abandoned and are re-claimed.
    async fn claim_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        worker: &str,
    ) -> StoreResult<Vec<OutboxEvent>>;

    async fn mark_completed(&self, claim: &Claim, at: DateTime<Utc>) -> StoreResult<()>;

    /// Records a failed attempt: `attempts += 1`, error stored.
    async fn mark_failed(
        &self,
        claim: &Claim,
        error: &str,
        disposition: FailureDisposition,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Returns the row to `pending` without recording an attempt.
    async fn release(
        &self,
        claim: &Claim,
        next_attempt_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<OutboxEvent>>;

    async fn list(
        &self,
        status: Option<OutboxStatus>,
        limit: u32,
        offset: u32,
    ) -> StoreResult<(Vec<OutboxEvent>, bool)>;

    /// Operator reprocessing of a terminal `failed` row.
    async fn requeue(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<OutboxEvent>;

    async fn count_by_status(&self) -> StoreResult<StatusCounts>;
}
