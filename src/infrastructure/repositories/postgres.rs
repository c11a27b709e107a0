use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, Pool, Postgres, Transaction, postgres::PgQueryResult};
use uuid::Uuid;

use crate::domain::{
    errors::PersistenceError,
    models::{Claim, FailureDisposition, NewOutboxEvent, OutboxEvent, OutboxStatus, StatusCounts},
    repositories::{OutboxRepository, StoreResult},
};

pub type PgPool = Pool<Postgres>;

#[derive(Clone)]
pub struct PostgresOutboxRepository {
    pool: PgPool,
}

impl PostgresOutboxRepository {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }

    /// Writes an outbox row inside the caller's transaction, so the event
    /// commits or rolls back together with the business change.
    pub async fn insert_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        event: NewOutboxEvent,
    ) -> StoreResult<OutboxEvent> {
        let id = event.id;
        let now = Utc::now();
        let record = sqlx::query_as::<_, OutboxEventRecord>(
            r#"
            INSERT INTO outbox_events (
                id, event_type, version, aggregate_id, payload, metadata,
                status, attempts, next_attempt_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', 0, $7, $7, $7)
            RETURNING *
            "#,
        )
        .bind(event.id)
        .bind(&event.event_type)
        .bind(&event.version)
        .bind(&event.aggregate_id)
        .bind(&event.payload)
        .bind(&event.metadata)
        .bind(now)
        .fetch_one(&mut **tx)
        .await
        .map_err(|err| map_insert_error(err, id))?;

        record.try_into()
    }
}

#[async_trait]
impl OutboxRepository for PostgresOutboxRepository {
    async fn insert(&self, event: NewOutboxEvent) -> StoreResult<OutboxEvent> {
        let mut tx = self.pool.begin().await?;
        let row = Self::insert_in_tx(&mut tx, event).await?;
        tx.commit().await?;
        Ok(row)
    }

    async fn claim_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        worker: &str,
    ) -> StoreResult<Vec<OutboxEvent>> {
        let records = sqlx::query_as::<_, OutboxEventRecord>(
            r#"
            WITH due AS (
                SELECT id
                FROM outbox_events
                WHERE (status = 'pending' AND next_attempt_at <= $2)
                   OR (status = 'processing' AND (claimed_at IS NULL OR claimed_at < $3))
                ORDER BY created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE outbox_events AS e
            SET status = 'processing',
                claim_token = gen_random_uuid(),
                claimed_by = $4,
                claimed_at = $2,
                updated_at = $2
            FROM due
            WHERE e.id = due.id
            RETURNING e.*
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(now)
        .bind(stale_before)
        .bind(worker)
        .fetch_all(&self.pool)
        .await?;

        let mut events = records
            .into_iter()
            .map(OutboxEvent::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        // RETURNING does not preserve the CTE ordering
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(events)
    }

    async fn mark_completed(&self, claim: &Claim, at: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'completed',
                processed_at = $3,
                last_attempt_at = $3,
                error_message = NULL,
                claim_token = NULL,
                claimed_by = NULL,
                claimed_at = NULL,
                updated_at = $3
            WHERE id = $1 AND status = 'processing' AND claim_token = $2
            "#,
        )
        .bind(claim.event_id)
        .bind(claim.token)
        .bind(at)
        .execute(&self.pool)
        .await?;
        ensure_held(claim, &result)
    }

    async fn mark_failed(
        &self,
        claim: &Claim,
        error: &str,
        disposition: FailureDisposition,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let (status, next_attempt_at) = match disposition {
            FailureDisposition::RetryAt(next) => (OutboxStatus::Pending, Some(next)),
            FailureDisposition::Exhausted => (OutboxStatus::Failed, None),
        };
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = $3,
                attempts = attempts + 1,
                error_message = $4,
                last_attempt_at = $5,
                next_attempt_at = COALESCE($6, next_attempt_at),
                claim_token = NULL,
                claimed_by = NULL,
                claimed_at = NULL,
                updated_at = $5
            WHERE id = $1 AND status = 'processing' AND claim_token = $2
            "#,
        )
        .bind(claim.event_id)
        .bind(claim.token)
        .bind(status.as_str())
        .bind(error)
        .bind(at)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await?;
        ensure_held(claim, &result)
    }

    async fn release(
        &self,
        claim: &Claim,
        next_attempt_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'pending',
                next_attempt_at = $3,
                claim_token = NULL,
                claimed_by = NULL,
                claimed_at = NULL,
                updated_at = $4
            WHERE id = $1 AND status = 'processing' AND claim_token = $2
            "#,
        )
        .bind(claim.event_id)
        .bind(claim.token)
        .bind(next_attempt_at)
        .bind(at)
        .execute(&self.pool)
        .await?;
        ensure_held(claim, &result)
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<OutboxEvent>> {
        let record = sqlx::query_as::<_, OutboxEventRecord>(
            r#"SELECT * FROM outbox_events WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        record.map(OutboxEvent::try_from).transpose()
    }

    async fn list(
        &self,
        status: Option<OutboxStatus>,
        limit: u32,
        offset: u32,
    ) -> StoreResult<(Vec<OutboxEvent>, bool)> {
        let limit = i64::from(limit);

        // one extra row tells whether another page exists
        let records = sqlx::query_as::<_, OutboxEventRecord>(
            r#"
            SELECT *
            FROM outbox_events
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY created_at ASC, id ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .bind(limit + 1)
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;

        let has_more = records.len() as i64 > limit;
        let events = records
            .into_iter()
            .take(limit as usize)
            .map(OutboxEvent::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((events, has_more))
    }

    async fn requeue(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<OutboxEvent> {
        let record = sqlx::query_as::<_, OutboxEventRecord>(
            r#"
            UPDATE outbox_events
            SET status = 'pending',
                next_attempt_at = $2,
                updated_at = $2
            WHERE id = $1 AND status = 'failed'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        match record {
            Some(record) => record.try_into(),
            None => match self.get(id).await? {
                Some(event) => Err(PersistenceError::InvalidTransition {
                    id,
                    from: event.status,
                    to: OutboxStatus::Pending,
                }),
                None => Err(PersistenceError::NotFound(id)),
            },
        }
    }

    async fn count_by_status(&self) -> StoreResult<StatusCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"SELECT status, COUNT(*) FROM outbox_events GROUP BY status"#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            let count = count.max(0) as u64;
            match status.parse::<OutboxStatus>().map_err(anyhow::Error::from)? {
                OutboxStatus::Pending => counts.pending += count,
                OutboxStatus::Processing => counts.processing += count,
                OutboxStatus::Completed => counts.completed += count,
                OutboxStatus::Failed => counts.failed += count,
            }
        }
        Ok(counts)
    }
}

#[derive(FromRow)]
struct OutboxEventRecord {
    id: Uuid,
    event_type: String,
    version: String,
    aggregate_id: Option<String>,
    payload: Value,
    metadata: Option<Value>,
    status: String,
    attempts: i32,
    error_message: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    last_attempt_at: Option<DateTime<Utc>>,
    next_attempt_at: DateTime<Utc>,
    claimed_at: Option<DateTime<Utc>>,
    claim_token: Option<Uuid>,
    claimed_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OutboxEventRecord> for OutboxEvent {
    type Error = PersistenceError;

    fn try_from(value: OutboxEventRecord) -> Result<Self, Self::Error> {
        let status = value
            .status
            .parse::<OutboxStatus>()
            .map_err(anyhow::Error::from)?;
        Ok(Self {
            id: value.id,
            event_type: value.event_type,
            version: value.version,
            aggregate_id: value.aggregate_id,
            payload: value.payload,
            metadata: value.metadata,
            status,
            attempts: value.attempts.max(0) as u32,
            error_message: value.error_message,
            processed_at: value.processed_at,
            last_attempt_at: value.last_attempt_at,
            next_attempt_at: value.next_attempt_at,
            claimed_at: value.claimed_at,
            claim_token: value.claim_token,
            claimed_by: value.claimed_by,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

/// Outcome updates match on the claim token; no row means someone else owns it.
fn ensure_held(claim: &Claim, result: &PgQueryResult) -> StoreResult<()> {
    if result.rows_affected() == 0 {
        return Err(PersistenceError::ClaimLost(claim.event_id));
    }
    Ok(())
}

fn map_insert_error(err: sqlx::Error, id: Uuid) -> PersistenceError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => PersistenceError::Duplicate(id),
        _ => err.into(),
    }
}
