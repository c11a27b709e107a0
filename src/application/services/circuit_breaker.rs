use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures within `failure_window` that open the breaker.
    pub failure_threshold: u32,
    pub failure_window: Duration,
    /// Time spent open before a trial is let through.
    pub cooldown: Duration,
    /// Calls admitted per half-open episode.
    pub half_open_max_trials: u32,
    /// Half-open successes required to close.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
            half_open_max_trials: 1,
            success_threshold: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_failure_window(mut self, window: Duration) -> Self {
        self.failure_window = window;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_half_open_trials(mut self, trials: u32, success_threshold: u32) -> Self {
        self.half_open_max_trials = trials;
        self.success_threshold = success_threshold;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("breaker failure threshold must be positive".to_string());
        }
        if self.half_open_max_trials == 0 || self.success_threshold == 0 {
            return Err("breaker half-open trials and success threshold must be positive".to_string());
        }
        if self.success_threshold > self.half_open_max_trials {
            return Err(format!(
                "breaker success threshold {} exceeds half-open trials {}",
                self.success_threshold, self.half_open_max_trials
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failures: u32,
    window_started_at: Option<Instant>,
    transitioned_at: Instant,
    trials_issued: u32,
    successes: u32,
}

impl Inner {
    fn transition(&mut self, to: BreakerState, now: Instant) {
        let from = self.state;
        self.state = to;
        self.transitioned_at = now;
        self.trials_issued = 0;
        self.successes = 0;
        if to != BreakerState::Open {
            self.failures = 0;
            self.window_started_at = None;
        }
        match to {
            BreakerState::Open => warn!(from = from.as_str(), to = to.as_str(), "circuit breaker opened"),
            _ => info!(from = from.as_str(), to = to.as_str(), "circuit breaker transition"),
        }
    }
}

/// Per-process guard around the broker connection.
///
/// Callers ask `allow` before publishing and must report every admitted call
/// through `on_success` or `on_failure`; half-open trial slots are only
/// settled by those reports.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: 0,
                window_started_at: None,
                transitioned_at: Instant::now(),
                trials_issued: 0,
                successes: 0,
            }),
        }
    }

    pub fn allow(&self) -> bool {
        let now = Instant::now();
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                if now.duration_since(inner.transitioned_at) < self.config.cooldown {
                    return false;
                }
                inner.transition(BreakerState::HalfOpen, now);
                inner.trials_issued = 1;
                true
            }
            BreakerState::HalfOpen => {
                if inner.trials_issued < self.config.half_open_max_trials {
                    inner.trials_issued += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn on_success(&self) {
        let now = Instant::now();
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.failures = 0;
                inner.window_started_at = None;
            }
            BreakerState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    inner.transition(BreakerState::Closed, now);
                }
            }
            // result of a call admitted before the breaker opened
            BreakerState::Open => {}
        }
    }

    pub fn on_failure(&self) {
        let now = Instant::now();
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => {
                let window_expired = inner
                    .window_started_at
                    .is_none_or(|started| now.duration_since(started) > self.config.failure_window);
                if window_expired {
                    inner.window_started_at = Some(now);
                    inner.failures = 1;
                } else {
                    inner.failures += 1;
                }
                if inner.failures >= self.config.failure_threshold {
                    inner.transition(BreakerState::Open, now);
                }
            }
            BreakerState::HalfOpen => inner.transition(BreakerState::Open, now),
            BreakerState::Open => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// Time left before an open breaker admits a trial.
    pub fn remaining_cooldown(&self) -> Option<Duration> {
        let inner = self.lock();
        match inner.state {
            BreakerState::Open => Some(
                self.config
                    .cooldown
                    .saturating_sub(Instant::now().duration_since(inner.transitioned_at)),
            ),
            _ => None,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // counters stay consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
