use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::domain::{
    models::OutboxEvent,
    repositories::{OutboxRepository, StoreResult},
};

/// Operator action: moves a `failed` row back to `pending`, due immediately.
/// The attempt counter and last error are kept for the audit trail.
pub struct RequeueEventUseCase {
    repo: Arc<dyn OutboxRepository>,
}

impl RequeueEventUseCase {
    pub fn new(repo: Arc<dyn OutboxRepository>) -> Self {
        Self { repo }
    }

    pub async fn execute(&self, id: Uuid) -> StoreResult<OutboxEvent> {
        let event = self.repo.requeue(id, Utc::now()).await?;
        info!(event_id = %id, attempts = event.attempts, "outbox event requeued");
        Ok(event)
    }
}
