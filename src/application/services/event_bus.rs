use async_trait::async_trait;

use crate::domain::{errors::PublishError, models::OutboxEvent};

/// Sends one outbox event to the broker. Implementations never retry; the
/// relay worker owns retry and breaker accounting.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &OutboxEvent) -> Result<(), PublishError>;

    fn is_connected(&self) -> bool {
        true
    }
}
