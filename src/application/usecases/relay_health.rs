use std::sync::Arc;

use crate::{
    application::services::{
        circuit_breaker::{BreakerState, CircuitBreaker},
        event_bus::EventPublisher,
        relay_status::{RelaySnapshot, RelayStatus},
    },
    domain::{
        models::StatusCounts,
        repositories::{OutboxRepository, StoreResult},
    },
};

pub struct RelayHealth {
    pub relay: RelaySnapshot,
    pub breaker_state: BreakerState,
    pub broker_connected: bool,
    pub backlog: StatusCounts,
}

pub struct RelayHealthUseCase {
    repo: Arc<dyn OutboxRepository>,
    publisher: Arc<dyn EventPublisher>,
    breaker: Arc<CircuitBreaker>,
    status: Arc<RelayStatus>,
}

impl RelayHealthUseCase {
    pub fn new(
        repo: Arc<dyn OutboxRepository>,
        publisher: Arc<dyn EventPublisher>,
        breaker: Arc<CircuitBreaker>,
        status: Arc<RelayStatus>,
    ) -> Self {
        Self {
            repo,
            publisher,
            breaker,
            status,
        }
    }

    pub async fn execute(&self) -> StoreResult<RelayHealth> {
        let backlog = self.repo.count_by_status().await?;
        Ok(RelayHealth {
            relay: self.status.snapshot(),
            breaker_state: self.breaker.state(),
            broker_connected: self.publisher.is_connected(),
            backlog,
        })
    }
}
