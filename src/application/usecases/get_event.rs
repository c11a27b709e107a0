use std::sync::Arc;

use uuid::Uuid;

use crate::domain::{
    errors::PersistenceError,
    models::OutboxEvent,
    repositories::{OutboxRepository, StoreResult},
};

pub struct GetEventUseCase {
    repo: Arc<dyn OutboxRepository>,
}

impl GetEventUseCase {
    pub fn new(repo: Arc<dyn OutboxRepository>) -> Self {
        Self { repo }
    }

    pub async fn execute(&self, id: Uuid) -> StoreResult<OutboxEvent> {
        self.repo
            .get(id)
            .await?
            .ok_or(PersistenceError::NotFound(id))
    }
}
