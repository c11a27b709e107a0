use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outbox_relay::{
    application::{
        handlers::relay_worker::{RelayConfig, RelayWorker},
        scheduler::RelayScheduler,
        services::{
            backoff::Backoff,
            circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig},
            event_bus::EventPublisher,
            relay_status::RelayStatus,
        },
        usecases::requeue_event::RequeueEventUseCase,
    },
    domain::{
        errors::{PersistenceError, PublishError},
        models::{
            Claim, FailureDisposition, NewOutboxEvent, OutboxEvent, OutboxStatus, StatusCounts,
        },
        repositories::{OutboxRepository, StoreResult},
    },
    infrastructure::{
        messaging::in_memory::InMemoryPublisher,
        repositories::in_memory::InMemoryOutboxRepository,
    },
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Harness {
    repo: Arc<InMemoryOutboxRepository>,
    publisher: Arc<InMemoryPublisher>,
    breaker: Arc<CircuitBreaker>,
    worker: RelayWorker,
}

impl Harness {
    fn new(breaker: CircuitBreakerConfig, config: RelayConfig) -> Self {
        let repo = Arc::new(InMemoryOutboxRepository::new());
        let publisher = Arc::new(InMemoryPublisher::new());
        let breaker = Arc::new(CircuitBreaker::new(breaker));
        let worker = RelayWorker::new(
            "scenario-worker",
            repo.clone(),
            publisher.clone(),
            breaker.clone(),
            config,
        );
        Self {
            repo,
            publisher,
            breaker,
            worker,
        }
    }

    async fn insert(&self, n: u32) -> OutboxEvent {
        self.repo
            .insert(
                NewOutboxEvent::new("order.placed", "1", json!({ "order": n }))
                    .with_aggregate_id(format!("order-{n}")),
            )
            .await
            .unwrap()
    }

    async fn stored(&self, id: Uuid) -> OutboxEvent {
        self.repo.get(id).await.unwrap().unwrap()
    }
}

/// Retries are due immediately so consecutive cycles pick them up.
fn immediate_retries() -> RelayConfig {
    RelayConfig {
        backoff: Backoff::new(Duration::ZERO, Duration::ZERO, 0.0),
        ..Default::default()
    }
}

#[tokio::test]
async fn successful_publish_completes_row_without_attempts() {
    let h = Harness::new(CircuitBreakerConfig::default(), immediate_retries());
    let row = h.insert(1).await;
    assert_eq!(row.status, OutboxStatus::Pending);
    assert_eq!(row.attempts, 0);

    let report = h.worker.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.completed, 1);

    let stored = h.stored(row.id).await;
    assert_eq!(stored.status, OutboxStatus::Completed);
    assert!(stored.processed_at.is_some());
    assert_eq!(stored.attempts, 0);
    assert!(stored.claim_token.is_none());

    let delivered = h.publisher.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].id, row.id);
    assert_eq!(delivered[0].partition_key(), "order-1");
}

#[tokio::test]
async fn two_transient_failures_then_success_records_two_attempts() {
    let h = Harness::new(CircuitBreakerConfig::default(), immediate_retries());
    h.publisher.fail_transient(2);
    let row = h.insert(1).await;

    let mut seen = Vec::new();
    for _ in 0..3 {
        h.worker.run_cycle(&CancellationToken::new()).await.unwrap();
        seen.push(h.stored(row.id).await.attempts);
    }

    let stored = h.stored(row.id).await;
    assert_eq!(stored.status, OutboxStatus::Completed);
    assert_eq!(stored.attempts, 2);
    assert_eq!(seen, vec![1, 2, 2]);
    assert_eq!(h.publisher.attempts().len(), 3);
}

#[tokio::test]
async fn permanent_rejection_fails_row_on_first_attempt() {
    let h = Harness::new(
        CircuitBreakerConfig::default(),
        RelayConfig {
            max_attempts: 50,
            ..immediate_retries()
        },
    );
    h.publisher
        .push_outcome(Err(PublishError::Permanent("schema violation".into())));
    let row = h.insert(1).await;

    let report = h.worker.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.failed, 1);

    let stored = h.stored(row.id).await;
    assert_eq!(stored.status, OutboxStatus::Failed);
    assert_eq!(stored.attempts, 1);
    assert!(stored.error_message.unwrap().contains("schema violation"));
    assert!(stored.processed_at.is_none());
}

#[tokio::test]
async fn open_breaker_skips_publish_and_keeps_attempts() {
    let h = Harness::new(
        CircuitBreakerConfig::default().with_failure_threshold(5),
        immediate_retries(),
    );
    h.publisher.fail_transient(5);
    let mut rows = Vec::new();
    for n in 0..6 {
        rows.push(h.insert(n).await);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let report = h.worker.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.retried, 5);
    assert_eq!(report.skipped, 1);
    assert_eq!(h.breaker.state(), BreakerState::Open);
    assert_eq!(h.publisher.attempts().len(), 5);

    let sixth = h.stored(rows[5].id).await;
    assert_eq!(sixth.status, OutboxStatus::Pending);
    assert_eq!(sixth.attempts, 0);
    assert!(sixth.error_message.is_none());
    assert!(sixth.next_attempt_at > Utc::now());
}

#[tokio::test]
async fn exhausted_retries_end_in_failed() {
    let h = Harness::new(
        CircuitBreakerConfig::default().with_failure_threshold(100),
        RelayConfig {
            max_attempts: 3,
            ..immediate_retries()
        },
    );
    h.publisher.fail_transient(10);
    let row = h.insert(1).await;

    for _ in 0..5 {
        h.worker.run_cycle(&CancellationToken::new()).await.unwrap();
    }

    let stored = h.stored(row.id).await;
    assert_eq!(stored.status, OutboxStatus::Failed);
    assert_eq!(stored.attempts, 3);
    assert_eq!(h.publisher.attempts().len(), 3);
}

#[tokio::test]
async fn concurrent_claims_never_overlap() {
    let repo = Arc::new(InMemoryOutboxRepository::new());
    for n in 0..40 {
        repo.insert(NewOutboxEvent::new("order.placed", "1", json!({ "n": n })))
            .await
            .unwrap();
    }

    let mut tasks = Vec::new();
    for worker in 0..8 {
        let repo = repo.clone();
        tasks.push(tokio::spawn(async move {
            let now = Utc::now();
            repo.claim_batch(5, now, now - chrono::Duration::minutes(5), &format!("w{worker}"))
                .await
                .unwrap()
        }));
    }

    let mut ids = HashSet::new();
    let mut total = 0;
    for task in tasks {
        for event in task.await.unwrap() {
            total += 1;
            ids.insert(event.id);
        }
    }
    assert_eq!(total, 40);
    assert_eq!(ids.len(), 40);
}

#[tokio::test]
async fn stale_claim_is_recovered_and_redelivered() {
    let h = Harness::new(
        CircuitBreakerConfig::default(),
        RelayConfig {
            stale_after: Duration::from_millis(50),
            ..immediate_retries()
        },
    );
    let row = h.insert(1).await;

    // a worker that published and then died before recording the outcome
    let now = Utc::now();
    let crashed = h
        .repo
        .claim_batch(10, now, now - chrono::Duration::minutes(5), "crashed")
        .await
        .unwrap();
    h.publisher.publish(&crashed[0]).await.unwrap();

    let report = h.worker.run_cycle(&CancellationToken::new()).await.unwrap();
    assert!(report.is_idle());

    tokio::time::sleep(Duration::from_millis(80)).await;
    let report = h.worker.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.completed, 1);

    let stored = h.stored(row.id).await;
    assert_eq!(stored.status, OutboxStatus::Completed);
    let delivered = h.publisher.delivered();
    assert_eq!(delivered.len(), 2);
    assert!(delivered.iter().all(|m| m.id == row.id));

    let stale = Claim::of(&crashed[0]).unwrap();
    let err = h.repo.mark_completed(&stale, Utc::now()).await.unwrap_err();
    assert!(matches!(err, PersistenceError::ClaimLost(_)));
}

#[tokio::test]
async fn outcome_updates_require_a_live_claim() {
    let h = Harness::new(CircuitBreakerConfig::default(), immediate_retries());
    let row = h.insert(1).await;

    let forged = Claim {
        event_id: row.id,
        token: Uuid::new_v4(),
    };
    let err = h.repo.mark_completed(&forged, Utc::now()).await.unwrap_err();
    assert!(matches!(err, PersistenceError::ClaimLost(_)));

    let stored = h.stored(row.id).await;
    assert_eq!(stored.status, OutboxStatus::Pending);
    assert!(stored.processed_at.is_none());
}

#[tokio::test]
async fn breaker_closes_again_after_cooldown_trial_succeeds() {
    let h = Harness::new(
        CircuitBreakerConfig::default()
            .with_failure_threshold(1)
            .with_cooldown(Duration::from_millis(30)),
        RelayConfig {
            breaker_skip_delay: Duration::ZERO,
            ..immediate_retries()
        },
    );
    h.publisher.fail_transient(1);
    let first = h.insert(1).await;
    tokio::time::sleep(Duration::from_millis(2)).await;
    let second = h.insert(2).await;

    let report = h.worker.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.retried, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(h.breaker.state(), BreakerState::Open);

    tokio::time::sleep(Duration::from_millis(60)).await;
    h.worker.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(h.breaker.state(), BreakerState::Closed);
    assert_eq!(h.stored(first.id).await.status, OutboxStatus::Completed);
    assert_eq!(h.stored(second.id).await.status, OutboxStatus::Completed);
    assert_eq!(h.stored(second.id).await.attempts, 0);
}

#[tokio::test]
async fn claims_about_to_go_stale_are_not_published() {
    let repo = Arc::new(InMemoryOutboxRepository::new());
    let slow = Arc::new(InMemoryPublisher::new().with_latency(Duration::from_millis(40)));
    let fast = Arc::new(InMemoryPublisher::new());
    let config = RelayConfig {
        batch_size: 5,
        stale_after: Duration::from_millis(100),
        publish_timeout: Duration::from_millis(50),
        ..immediate_retries()
    };
    let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
    let first = RelayWorker::new("first", repo.clone(), slow.clone(), breaker.clone(), config.clone());
    let second = RelayWorker::new("second", repo.clone(), fast.clone(), breaker, config);

    let mut ids = HashSet::new();
    for n in 0..5 {
        let row = repo
            .insert(NewOutboxEvent::new("order.placed", "1", json!({ "n": n })))
            .await
            .unwrap();
        ids.insert(row.id);
    }

    let report = first.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.claimed, 5);
    assert!(report.expired >= 1);
    assert_eq!(report.completed + report.expired, 5);
    assert_eq!(report.lost, 0);

    tokio::time::sleep(Duration::from_millis(120)).await;
    let recovered = second.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(recovered.completed, report.expired);

    let delivered: Vec<Uuid> = slow
        .delivered()
        .iter()
        .chain(fast.delivered().iter())
        .map(|m| m.id)
        .collect();
    assert_eq!(delivered.len(), 5);
    assert_eq!(delivered.into_iter().collect::<HashSet<_>>(), ids);
    assert_eq!(repo.count_by_status().await.unwrap().completed, 5);
}

#[tokio::test]
async fn breaker_skip_delay_is_the_longer_of_cooldown_and_floor() {
    let cases = [
        (Duration::from_secs(30), Duration::from_secs(1), Duration::from_secs(30)),
        (Duration::from_millis(100), Duration::from_secs(10), Duration::from_secs(10)),
    ];
    for (cooldown, floor, expected) in cases {
        let h = Harness::new(
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_cooldown(cooldown),
            RelayConfig {
                breaker_skip_delay: floor,
                ..immediate_retries()
            },
        );
        h.publisher.fail_transient(1);
        h.insert(1).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        let denied = h.insert(2).await;

        let before = Utc::now();
        let report = h.worker.run_cycle(&CancellationToken::new()).await.unwrap();
        let after = Utc::now();
        assert_eq!(report.skipped, 1);

        let stored = h.stored(denied.id).await;
        let expected = chrono::Duration::from_std(expected).unwrap();
        let tolerance = chrono::Duration::milliseconds(100);
        assert!(stored.next_attempt_at >= before + expected - tolerance);
        assert!(stored.next_attempt_at <= after + expected);
        assert_eq!(stored.attempts, 0);
    }
}

#[tokio::test]
async fn requeued_row_at_max_attempts_fails_again_on_next_error() {
    let h = Harness::new(
        CircuitBreakerConfig::default(),
        RelayConfig {
            max_attempts: 2,
            ..immediate_retries()
        },
    );
    h.publisher.fail_transient(3);
    let row = h.insert(1).await;

    for _ in 0..2 {
        h.worker.run_cycle(&CancellationToken::new()).await.unwrap();
    }
    assert_eq!(h.stored(row.id).await.status, OutboxStatus::Failed);

    let requeued = RequeueEventUseCase::new(h.repo.clone())
        .execute(row.id)
        .await
        .unwrap();
    assert_eq!(requeued.status, OutboxStatus::Pending);
    assert_eq!(requeued.attempts, 2);

    let report = h.worker.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.failed, 1);
    let stored = h.stored(row.id).await;
    assert_eq!(stored.status, OutboxStatus::Failed);
    assert_eq!(stored.attempts, 3);
    assert_eq!(h.publisher.attempts().len(), 3);
}

/// In-memory store whose first `mark_completed` calls fail like a dropped connection.
struct FlakyRepository {
    inner: InMemoryOutboxRepository,
    failures_left: AtomicUsize,
}

#[async_trait]
impl OutboxRepository for FlakyRepository {
    async fn insert(&self, event: NewOutboxEvent) -> StoreResult<OutboxEvent> {
        self.inner.insert(event).await
    }

    async fn claim_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        worker: &str,
    ) -> StoreResult<Vec<OutboxEvent>> {
        self.inner.claim_batch(limit, now, stale_before, worker).await
    }

    async fn mark_completed(&self, claim: &Claim, at: DateTime<Utc>) -> StoreResult<()> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(anyhow::anyhow!("connection reset by peer").into());
        }
        self.inner.mark_completed(claim, at).await
    }

    async fn mark_failed(
        &self,
        claim: &Claim,
        error: &str,
        disposition: FailureDisposition,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.inner.mark_failed(claim, error, disposition, at).await
    }

    async fn release(
        &self,
        claim: &Claim,
        next_attempt_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.inner.release(claim, next_attempt_at, at).await
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<OutboxEvent>> {
        self.inner.get(id).await
    }

    async fn list(
        &self,
        status: Option<OutboxStatus>,
        limit: u32,
        offset: u32,
    ) -> StoreResult<(Vec<OutboxEvent>, bool)> {
        self.inner.list(status, limit, offset).await
    }

    async fn requeue(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<OutboxEvent> {
        self.inner.requeue(id, at).await
    }

    async fn count_by_status(&self) -> StoreResult<StatusCounts> {
        self.inner.count_by_status().await
    }
}

#[tokio::test]
async fn store_failure_mid_cycle_is_recovered_by_later_cycles() {
    let repo = Arc::new(FlakyRepository {
        inner: InMemoryOutboxRepository::new(),
        failures_left: AtomicUsize::new(1),
    });
    let publisher = Arc::new(InMemoryPublisher::new());
    let row = repo
        .insert(NewOutboxEvent::new("order.placed", "1", json!({})))
        .await
        .unwrap();

    let config = RelayConfig {
        stale_after: Duration::from_millis(50),
        publish_timeout: Duration::from_millis(20),
        poll_interval: Duration::from_millis(10),
        ..immediate_retries()
    };
    let worker = RelayWorker::new(
        "flaky",
        repo.clone(),
        publisher.clone(),
        Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
        config.clone(),
    );
    let status = Arc::new(RelayStatus::new());
    let handle = RelayScheduler::new(vec![worker], status.clone(), config.poll_interval)
        .spawn(CancellationToken::new());

    let mut completed = false;
    for _ in 0..200 {
        if repo.get(row.id).await.unwrap().unwrap().status == OutboxStatus::Completed {
            completed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(handle.shutdown(Duration::from_secs(5)).await);
    assert!(completed);

    let snapshot = status.snapshot();
    assert!(snapshot.last_error.unwrap().contains("connection reset"));
    assert!(snapshot.cycles > 1);
    assert_eq!(snapshot.totals.completed, 1);

    let delivered = publisher.delivered();
    assert_eq!(delivered.len(), 2);
    assert!(delivered.iter().all(|m| m.id == row.id));
}
