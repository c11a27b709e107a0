use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::models::CycleReport;

/// Liveness snapshot shared between the scheduler and the health endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RelaySnapshot {
    pub running: bool,
    pub cycles: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub totals: CycleReport,
}

#[derive(Debug, Default)]
pub struct RelayStatus {
    inner: RwLock<RelaySnapshot>,
}

impl RelayStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running(&self, running: bool) {
        self.write(|s| s.running = running);
    }

    pub fn record_cycle(&self, report: &CycleReport) {
        let now = Utc::now();
        self.write(|s| {
            s.cycles += 1;
            s.last_cycle_at = Some(now);
            s.totals.merge(report);
        });
    }

    pub fn record_error(&self, error: &str) {
        let now = Utc::now();
        self.write(|s| {
            s.cycles += 1;
            s.last_error = Some(error.to_string());
            s.last_error_at = Some(now);
        });
    }

    pub fn snapshot(&self) -> RelaySnapshot {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn write(&self, f: impl FnOnce(&mut RelaySnapshot)) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard);
    }
}
