use std::sync::Arc;

use crate::domain::{
    models::{OutboxEvent, OutboxStatus},
    repositories::{OutboxRepository, StoreResult},
};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 500;

pub struct ListEventsRequest {
    pub status: Option<OutboxStatus>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

pub struct ListEventsResponse {
    pub events: Vec<OutboxEvent>,
    pub has_more: bool,
    pub next_offset: Option<u32>,
}

pub struct ListEventsUseCase {
    repo: Arc<dyn OutboxRepository>,
}

impl ListEventsUseCase {
    pub fn new(repo: Arc<dyn OutboxRepository>) -> Self {
        Self { repo }
    }

    pub async fn execute(&self, request: ListEventsRequest) -> StoreResult<ListEventsResponse> {
        let limit = request
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let offset = request.offset.unwrap_or(0);

        let (events, has_more) = self.repo.list(request.status, limit, offset).await?;
        let next_offset = has_more.then(|| offset.saturating_add(events.len() as u32));

        Ok(ListEventsResponse {
            events,
            has_more,
            next_offset,
        })
    }
}
