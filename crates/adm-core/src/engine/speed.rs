//! Exponentially-smoothed transfer speed.

use std::time::{Duration, Instant};

const ALPHA: f64 = 0.3;
/// Samples closer together than this reuse the previous estimate; dividing
/// by a near-zero interval produces absurd instantaneous speeds.
const MIN_INTERVAL: Duration = Duration::from_millis(50);

/// Speed estimator: `ema ← α·instant + (1-α)·ema`, seeded with the first
/// instantaneous sample. Both the multi-segment and single-connection paths
/// feed the same estimator.
pub(crate) struct SpeedEma {
    ema: f64,
    last_time: Option<Instant>,
    last_bytes: u64,
}

impl SpeedEma {
    pub(crate) fn new() -> Self {
        Self {
            ema: 0.0,
            last_time: None,
            last_bytes: 0,
        }
    }

    /// Feed the current cumulative byte count; returns the smoothed bytes/sec.
    pub(crate) fn sample(&mut self, now: Instant, bytes: u64) -> f64 {
        let Some(last) = self.last_time else {
            self.last_time = Some(now);
            self.last_bytes = bytes;
            return self.ema;
        };
        let dt = now.duration_since(last);
        if dt < MIN_INTERVAL {
            return self.ema;
        }
        let delta = bytes.saturating_sub(self.last_bytes) as f64;
        let instant = delta / dt.as_secs_f64();
        self.ema = if self.ema == 0.0 {
            instant
        } else {
            ALPHA * instant + (1.0 - ALPHA) * self.ema
        };
        self.last_time = Some(now);
        self.last_bytes = bytes;
        self.ema
    }
}
