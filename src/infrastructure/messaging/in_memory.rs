use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::{
    application::services::event_bus::EventPublisher,
    domain::{errors::PublishError, events::BrokerMessage, models::OutboxEvent},
};

/// Broker stand-in: records every delivered envelope and replays a scripted
/// sequence of outcomes (success once the script runs out).
#[derive(Default)]
pub struct InMemoryPublisher {
    delivered: Mutex<Vec<BrokerMessage>>,
    attempts: Mutex<Vec<BrokerMessage>>,
    script: Mutex<VecDeque<Result<(), PublishError>>>,
    latency: Option<Duration>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn push_outcome(&self, outcome: Result<(), PublishError>) {
        lock(&self.script).push_back(outcome);
    }

    pub fn fail_transient(&self, times: usize) {
        for n in 0..times {
            self.push_outcome(Err(PublishError::Transient(format!(
                "broker unavailable ({})",
                n + 1
            ))));
        }
    }

    /// Messages that landed on the "broker".
    pub fn delivered(&self) -> Vec<BrokerMessage> {
        lock(&self.delivered).clone()
    }

    /// Every publish call, successful or not.
    pub fn attempts(&self) -> Vec<BrokerMessage> {
        lock(&self.attempts).clone()
    }
}

#[async_trait]
impl EventPublisher for InMemoryPublisher {
    async fn publish(&self, event: &OutboxEvent) -> Result<(), PublishError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let message = BrokerMessage::from(event);
        lock(&self.attempts).push(message.clone());

        let outcome = lock(&self.script).pop_front().unwrap_or(Ok(()));
        if outcome.is_ok() {
            // duplicates are accepted; consumers dedup on id
            lock(&self.delivered).push(message);
        }
        outcome
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
