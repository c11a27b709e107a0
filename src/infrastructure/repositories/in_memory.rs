use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{
    errors::PersistenceError,
    models::{Claim, FailureDisposition, NewOutboxEvent, OutboxEvent, OutboxStatus, StatusCounts},
    repositories::{OutboxRepository, StoreResult},
};

/// Outbox store kept in process memory. Claims are taken under a single write
/// lock, which gives the same exclusivity as row locking in Postgres.
#[derive(Default)]
pub struct InMemoryOutboxRepository {
    events: Arc<RwLock<HashMap<Uuid, OutboxEvent>>>,
}

impl InMemoryOutboxRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update_held<F>(&self, claim: &Claim, to: OutboxStatus, apply: F) -> StoreResult<()>
    where
        F: FnOnce(&mut OutboxEvent),
    {
        let mut events = self.events.write().await;
        let event = events
            .get_mut(&claim.event_id)
            .ok_or(PersistenceError::NotFound(claim.event_id))?;
        if !event.is_held_by(claim) {
            return Err(PersistenceError::ClaimLost(claim.event_id));
        }
        if !event.status.can_transition_to(to) {
            return Err(PersistenceError::InvalidTransition {
                id: event.id,
                from: event.status,
                to,
            });
        }
        event.status = to;
        apply(event);
        event.claim_token = None;
        event.claimed_by = None;
        event.claimed_at = None;
        Ok(())
    }
}

#[async_trait]
impl OutboxRepository for InMemoryOutboxRepository {
    async fn insert(&self, event: NewOutboxEvent) -> StoreResult<OutboxEvent> {
        let mut events = self.events.write().await;
        if events.contains_key(&event.id) {
            return Err(PersistenceError::Duplicate(event.id));
        }
        let row = event.into_pending(Utc::now());
        events.insert(row.id, row.clone());
        Ok(row)
    }

    async fn claim_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        worker: &str,
    ) -> StoreResult<Vec<OutboxEvent>> {
        let mut events = self.events.write().await;

        let mut due: Vec<(DateTime<Utc>, Uuid)> = events
            .values()
            .filter(|e| e.is_claimable(now, stale_before))
            .map(|e| (e.created_at, e.id))
            .collect();
        due.sort();
        due.truncate(limit);

        let mut claimed = Vec::with_capacity(due.len());
        for (_, id) in due {
            if let Some(event) = events.get_mut(&id) {
                event.status = OutboxStatus::Processing;
                event.claim_token = Some(Uuid::new_v4());
                event.claimed_by = Some(worker.to_string());
                event.claimed_at = Some(now);
                event.updated_at = now;
                claimed.push(event.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_completed(&self, claim: &Claim, at: DateTime<Utc>) -> StoreResult<()> {
        self.update_held(claim, OutboxStatus::Completed, |event| {
            event.processed_at = Some(at);
            event.last_attempt_at = Some(at);
            event.error_message = None;
            event.updated_at = at;
        })
        .await
    }

    async fn mark_failed(
        &self,
        claim: &Claim,
        error: &str,
        disposition: FailureDisposition,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let to = match disposition {
            FailureDisposition::RetryAt(_) => OutboxStatus::Pending,
            FailureDisposition::Exhausted => OutboxStatus::Failed,
        };
        self.update_held(claim, to, |event| {
            event.attempts = event.attempts.saturating_add(1);
            event.error_message = Some(error.to_string());
            event.last_attempt_at = Some(at);
            event.updated_at = at;
            if let FailureDisposition::RetryAt(next_attempt_at) = disposition {
                event.next_attempt_at = next_attempt_at;
            }
        })
        .await
    }

    async fn release(
        &self,
        claim: &Claim,
        next_attempt_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.update_held(claim, OutboxStatus::Pending, |event| {
            event.next_attempt_at = next_attempt_at;
            event.updated_at = at;
        })
        .await
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<OutboxEvent>> {
        let events = self.events.read().await;
        Ok(events.get(&id).cloned())
    }

    async fn list(
        &self,
        status: Option<OutboxStatus>,
        limit: u32,
        offset: u32,
    ) -> StoreResult<(Vec<OutboxEvent>, bool)> {
        let events = self.events.read().await;
        let mut rows: Vec<OutboxEvent> = events
            .values()
            .filter(|e| status.is_none_or(|s| e.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let rows: Vec<OutboxEvent> = rows.into_iter().skip(offset as usize).collect();
        let has_more = rows.len() > limit as usize;
        Ok((rows.into_iter().take(limit as usize).collect(), has_more))
    }

    async fn requeue(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<OutboxEvent> {
        let mut events = self.events.write().await;
        let event = events.get_mut(&id).ok_or(PersistenceError::NotFound(id))?;
        if event.status != OutboxStatus::Failed {
            return Err(PersistenceError::InvalidTransition {
                id,
                from: event.status,
                to: OutboxStatus::Pending,
            });
        }
        event.status = OutboxStatus::Pending;
        event.next_attempt_at = at;
        event.updated_at = at;
        Ok(event.clone())
    }

    async fn count_by_status(&self) -> StoreResult<StatusCounts> {
        let events = self.events.read().await;
        let mut counts = StatusCounts::default();
        for event in events.values() {
            match event.status {
                OutboxStatus::Pending => counts.pending += 1,
                OutboxStatus::Processing => counts.processing += 1,
                OutboxStatus::Completed => counts.completed += 1,
                OutboxStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}
