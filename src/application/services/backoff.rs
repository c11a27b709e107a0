use std::time::Duration;

use rand::Rng;

/// Exponential retry delay: `base * 2^attempts`, capped at `max`, plus up to
/// `jitter` (a fraction of the capped delay) of random spread.
#[derive(Debug, Clone)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(300),
            jitter: 0.2,
        }
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        Self { base, max, jitter }
    }

    /// Delay before the next try of a row that has failed `attempts` times.
    pub fn delay(&self, attempts: u32) -> Duration {
        let delay = self.capped(attempts);
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let spread = delay.mul_f64(self.jitter.min(1.0));
        let extra = rand::thread_rng().gen_range(Duration::ZERO..=spread);
        delay + extra
    }

    fn capped(&self, attempts: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempts);
        self.base.saturating_mul(factor).min(self.max)
    }
}
