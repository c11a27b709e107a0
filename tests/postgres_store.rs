//! Runs against a real Postgres. Set `TEST_DATABASE_URL` and use
//! `cargo test -- --ignored` to include these.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use outbox_relay::{
    domain::{
        errors::PersistenceError,
        models::{Claim, FailureDisposition, NewOutboxEvent, OutboxStatus},
        repositories::OutboxRepository,
    },
    infrastructure::repositories::postgres::{PgPool, PostgresOutboxRepository},
};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::{Mutex, MutexGuard};

// tests share one table
static DATABASE: Mutex<()> = Mutex::const_new(());

async fn pool() -> (PgPool, MutexGuard<'static, ()>) {
    let guard = DATABASE.lock().await;
    let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("connect to test database");
    sqlx::migrate!("./migrations").run(&pool).await.expect("migrate");
    sqlx::query("TRUNCATE outbox_events")
        .execute(&pool)
        .await
        .expect("truncate");
    (pool, guard)
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn concurrent_claims_are_disjoint() {
    let (pool, _guard) = pool().await;
    let repo = PostgresOutboxRepository::new(pool);
    for n in 0..60 {
        repo.insert(NewOutboxEvent::new("order.placed", "1", json!({ "n": n })))
            .await
            .unwrap();
    }

    let mut tasks = Vec::new();
    for worker in 0..6 {
        let repo = Arc::clone(&repo);
        tasks.push(tokio::spawn(async move {
            let now = Utc::now();
            repo.claim_batch(10, now, now - Duration::minutes(5), &format!("w{worker}"))
                .await
                .unwrap()
        }));
    }

    let mut ids = HashSet::new();
    let mut total = 0;
    for task in tasks {
        for event in task.await.unwrap() {
            assert_eq!(event.status, OutboxStatus::Processing);
            total += 1;
            ids.insert(event.id);
        }
    }
    assert_eq!(total, 60);
    assert_eq!(ids.len(), 60);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn transactional_insert_rolls_back_with_caller() {
    let (pool, _guard) = pool().await;
    let repo = PostgresOutboxRepository::new(pool.clone());
    let event = NewOutboxEvent::new("order.placed", "1", json!({}));

    let mut tx = pool.begin().await.unwrap();
    PostgresOutboxRepository::insert_in_tx(&mut tx, event.clone())
        .await
        .unwrap();
    tx.rollback().await.unwrap();
    assert!(repo.get(event.id).await.unwrap().is_none());

    repo.insert(event.clone()).await.unwrap();
    let err = repo.insert(event.clone()).await.unwrap_err();
    assert!(matches!(err, PersistenceError::Duplicate(_)));
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn stale_reclaim_invalidates_previous_owner() {
    let (pool, _guard) = pool().await;
    let repo = PostgresOutboxRepository::new(pool);
    let row = repo
        .insert(NewOutboxEvent::new("order.placed", "1", json!({})))
        .await
        .unwrap();

    let now = Utc::now();
    let first = repo
        .claim_batch(1, now, now - Duration::minutes(5), "w1")
        .await
        .unwrap();
    let old = Claim::of(&first[0]).unwrap();

    let later = now + Duration::minutes(10);
    let second = repo
        .claim_batch(1, later, later - Duration::minutes(5), "w2")
        .await
        .unwrap();
    let new = Claim::of(&second[0]).unwrap();

    let err = repo
        .mark_failed(&old, "timeout", FailureDisposition::Exhausted, later)
        .await
        .unwrap_err();
    assert!(matches!(err, PersistenceError::ClaimLost(_)));

    repo.mark_completed(&new, later).await.unwrap();
    let stored = repo.get(row.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OutboxStatus::Completed);
    assert_eq!(stored.attempts, 0);
    assert_eq!(repo.count_by_status().await.unwrap().completed, 1);
}
