use rand::Rng;
use std::time::Duration;

use crate::config::RetrySettings;

/// Exponential backoff with an upper cap and optional jitter.
///
/// Delay for attempt `n` (0-based): `min(initial * factor^n, max)`, then
/// multiplied by a uniform factor in [0.75, 1.25] when jitter is on.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Base delay for backoff.
    pub initial_delay: Duration,
    /// Upper bound on a single backoff delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_factor: f64,
    /// Spread delays so parallel failures don't retry in lockstep.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(s: &RetrySettings) -> Self {
        Self {
            max_retries: s.max_retries,
            initial_delay: Duration::from_millis(s.initial_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
            backoff_factor: s.backoff_factor,
            jitter: s.jitter,
        }
    }
}

impl RetryConfig {
    /// Backoff delay before retry number `attempt` (0-based), floored to ms.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let raw_ms = base_ms * self.backoff_factor.powi(attempt.min(32) as i32);
        let capped_ms = raw_ms.min(self.max_delay.as_millis() as f64);
        let jittered_ms = if self.jitter {
            capped_ms * rand::thread_rng().gen_range(0.75..=1.25)
        } else {
            capped_ms
        };
        Duration::from_millis(jittered_ms.floor() as u64)
    }
}
