use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    application::services::{
        backoff::Backoff, circuit_breaker::CircuitBreaker, event_bus::EventPublisher,
    },
    domain::{
        errors::{PersistenceError, PublishError, RelayError},
        models::{Claim, CycleReport, FailureDisposition, OutboxEvent},
        repositories::{OutboxRepository, StoreResult},
    },
};

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub batch_size: usize,
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// A `processing` claim older than this is considered abandoned.
    pub stale_after: Duration,
    /// Minimum delay before a breaker-skipped row is due again.
    pub breaker_skip_delay: Duration,
    pub store_timeout: Duration,
    pub publish_timeout: Duration,
    pub poll_interval: Duration,
    pub workers: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_attempts: 5,
            backoff: Backoff::default(),
            stale_after: Duration::from_secs(300),
            breaker_skip_delay: Duration::from_secs(1),
            store_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            workers: 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Completed,
    Retried,
    Failed,
    Skipped,
    Released,
    Expired,
}

impl CycleReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Completed => self.completed += 1,
            Outcome::Retried => self.retried += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Released => self.released += 1,
            Outcome::Expired => self.expired += 1,
        }
    }
}

/// Drives claimed outbox rows to a terminal state or back to `pending`.
pub struct RelayWorker {
    name: String,
    repo: Arc<dyn OutboxRepository>,
    publisher: Arc<dyn EventPublisher>,
    breaker: Arc<CircuitBreaker>,
    config: RelayConfig,
}

impl RelayWorker {
    pub fn new(
        name: impl Into<String>,
        repo: Arc<dyn OutboxRepository>,
        publisher: Arc<dyn EventPublisher>,
        breaker: Arc<CircuitBreaker>,
        config: RelayConfig,
    ) -> Self {
        Self {
            name: name.into(),
            repo,
            publisher,
            breaker,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Claims one batch and resolves every row in it.
    ///
    /// Once `cancel` fires, the publish in progress finishes and the rest of
    /// the batch is released without consuming attempts. A store failure
    /// aborts the cycle; rows it leaves in `processing` are recovered through
    /// the staleness threshold.
    #[instrument(skip_all, fields(worker = %self.name))]
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport, RelayError> {
        let now = Utc::now();
        let stale_before = shift_back(now, self.config.stale_after);
        let batch = self
            .bounded(self.repo.claim_batch(
                self.config.batch_size,
                now,
                stale_before,
                &self.name,
            ))
            .await?;

        let mut report = CycleReport {
            claimed: batch.len(),
            ..Default::default()
        };
        let mut queue: VecDeque<OutboxEvent> = batch.into();

        while let Some(event) = queue.pop_front() {
            if cancel.is_cancelled() {
                queue.push_front(event);
                self.release_unattempted(queue, &mut report).await?;
                break;
            }
            self.process(event, &mut report).await?;
        }

        if report.is_idle() {
            debug!("no outbox events due");
        } else {
            info!(
                claimed = report.claimed,
                completed = report.completed,
                retried = report.retried,
                failed = report.failed,
                skipped = report.skipped,
                released = report.released,
                lost = report.lost,
                expired = report.expired,
                "relay cycle finished"
            );
        }
        Ok(report)
    }

    async fn process(
        &self,
        event: OutboxEvent,
        report: &mut CycleReport,
    ) -> Result<(), PersistenceError> {
        let Some(claim) = Claim::of(&event) else {
            warn!(event_id = %event.id, "claimed outbox event has no claim token");
            return Ok(());
        };

        // the publish must be able to finish while the claim is still ours
        if let Some(expires_at) = event.claimed_at.map(|at| shift(at, self.config.stale_after)) {
            if shift(Utc::now(), self.config.publish_timeout) > expires_at {
                warn!(
                    event_id = %event.id,
                    expires_at = %expires_at,
                    "claim too close to going stale, leaving event for re-claim"
                );
                report.record(Outcome::Expired);
                return Ok(());
            }
        }

        if !self.breaker.allow() {
            let delay = self
                .breaker
                .remaining_cooldown()
                .map_or(self.config.breaker_skip_delay, |left| {
                    left.max(self.config.breaker_skip_delay)
                });
            debug!(
                event_id = %event.id,
                delay_ms = delay.as_millis() as u64,
                reason = %RelayError::BreakerOpen,
                "releasing outbox event"
            );
            let now = Utc::now();
            return self
                .settle(
                    self.repo.release(&claim, shift(now, delay), now),
                    &event,
                    Outcome::Skipped,
                    report,
                )
                .await;
        }

        let outcome = match tokio::time::timeout(
            self.config.publish_timeout,
            self.publisher.publish(&event),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PublishError::Transient(format!(
                "publish timed out after {}ms",
                self.config.publish_timeout.as_millis()
            ))),
        };
        let now = Utc::now();

        match outcome {
            Ok(()) => {
                self.breaker.on_success();
                self.settle(
                    self.repo.mark_completed(&claim, now),
                    &event,
                    Outcome::Completed,
                    report,
                )
                .await
            }
            Err(err) => {
                // a rejection is still an answer from a reachable broker
                if err.is_retryable() {
                    self.breaker.on_failure();
                } else {
                    self.breaker.on_success();
                }

                let attempts = event.attempts.saturating_add(1);
                let disposition = self.disposition(&err, attempts, now);
                let outcome = match disposition {
                    FailureDisposition::RetryAt(next_attempt_at) => {
                        warn!(
                            event_id = %event.id,
                            event_type = %event.event_type,
                            attempts,
                            next_attempt_at = %next_attempt_at,
                            error = %err,
                            "publish failed, scheduling retry"
                        );
                        Outcome::Retried
                    }
                    FailureDisposition::Exhausted => {
                        error!(
                            event_id = %event.id,
                            event_type = %event.event_type,
                            attempts,
                            error = %err,
                            "publish failed permanently"
                        );
                        Outcome::Failed
                    }
                };
                self.settle(
                    self.repo
                        .mark_failed(&claim, &err.to_string(), disposition, now),
                    &event,
                    outcome,
                    report,
                )
                .await
            }
        }
    }

    fn disposition(
        &self,
        err: &PublishError,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> FailureDisposition {
        if !err.is_retryable() || attempts >= self.config.max_attempts {
            FailureDisposition::Exhausted
        } else {
            FailureDisposition::RetryAt(shift(now, self.config.backoff.delay(attempts)))
        }
    }

    async fn release_unattempted(
        &self,
        queue: VecDeque<OutboxEvent>,
        report: &mut CycleReport,
    ) -> Result<(), PersistenceError> {
        info!(count = queue.len(), "shutdown requested, releasing unattempted events");
        for event in queue {
            let Some(claim) = Claim::of(&event) else {
                continue;
            };
            let now = Utc::now();
            self.settle(self.repo.release(&claim, now, now), &event, Outcome::Released, report)
                .await?;
        }
        Ok(())
    }

    /// Applies an outcome update; a lost claim is counted, not propagated.
    async fn settle(
        &self,
        update: impl Future<Output = StoreResult<()>>,
        event: &OutboxEvent,
        outcome: Outcome,
        report: &mut CycleReport,
    ) -> Result<(), PersistenceError> {
        match self.bounded(update).await {
            Ok(()) => {
                report.record(outcome);
                Ok(())
            }
            Err(PersistenceError::ClaimLost(id)) => {
                warn!(event_id = %id, ?outcome, "outcome discarded, claim taken over by another worker");
                report.lost += 1;
                Ok(())
            }
            Err(err) => {
                error!(event_id = %event.id, error = %err, "failed to record outbox outcome");
                Err(err)
            }
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = StoreResult<T>>,
    ) -> Result<T, PersistenceError> {
        tokio::time::timeout(self.config.store_timeout, call)
            .await
            .map_err(|_| PersistenceError::Timeout)?
    }
}

fn shift(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn shift_back(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
