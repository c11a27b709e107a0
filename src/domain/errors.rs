use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::OutboxStatus;

/// Store unavailable, timed out, or a conditional write did not match.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("outbox event already exists: {0}")]
    Duplicate(Uuid),
    #[error("claim on outbox event {0} is no longer held")]
    ClaimLost(Uuid),
    #[error("outbox event not found: {0}")]
    NotFound(Uuid),
    #[error("outbox event {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: Uuid,
        from: OutboxStatus,
        to: OutboxStatus,
    },
    #[error("outbox store call timed out")]
    Timeout,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<sqlx::Error> for PersistenceError {
    fn from(err: sqlx::Error) -> Self {
        PersistenceError::Backend(err.into())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown outbox status {0:?}")]
pub struct UnknownStatus(pub String);

/// Failure reported by the publisher client for a single attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    /// Broker timeout or connectivity failure; worth retrying.
    #[error("transient publish failure: {0}")]
    Transient(String),
    /// Broker rejected the message itself; retrying cannot help.
    #[error("publish rejected: {0}")]
    Permanent(String),
}

impl PublishError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PublishError::Transient(_))
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    /// Never fatal to a cycle; the row is released with a backoff instead.
    #[error("publish skipped: circuit breaker is open")]
    BreakerOpen,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(PublishError::Transient("timeout".into()).is_retryable());
        assert!(!PublishError::Permanent("schema".into()).is_retryable());
    }
}
