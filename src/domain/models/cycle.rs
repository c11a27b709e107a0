use serde::Serialize;

/// Outcome counts for one claim-batch cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub claimed: usize,
    pub completed: usize,
    /// Failed attempts sent back to `pending` with a backoff.
    pub retried: usize,
    /// Rows moved to terminal `failed`.
    pub failed: usize,
    /// Rows released because the circuit breaker denied the publish.
    pub skipped: usize,
    /// Rows released unattempted because shutdown was requested.
    pub released: usize,
    /// Outcome updates rejected because another worker re-claimed the row.
    pub lost: usize,
    /// Rows left unpublished because their claim would go stale mid-publish.
    pub expired: usize,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.claimed == 0
    }

    /// Whether any row in the cycle reached the broker.
    pub fn attempted_any(&self) -> bool {
        self.completed + self.retried + self.failed > 0
    }

    pub fn merge(&mut self, other: &CycleReport) {
        self.claimed += other.claimed;
        self.completed += other.completed;
        self.retried += other.retried;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.released += other.released;
        self.lost += other.lost;
        self.expired += other.expired;
    }
}
