//! Token-bucket bandwidth pacing for segment fetchers.
//!
//! Capacity equals the refill rate, so a fetcher may burst at most one
//! second's worth of bytes before it starts sleeping off the shortfall.
//! Fetchers run on blocking threads, so acquisition blocks rather than awaits.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Shared token bucket. A rate of 0 disables pacing entirely.
pub struct TokenBucket {
    state: Mutex<Bucket>,
}

struct Bucket {
    /// Maximum tokens the bucket holds; controls burstiness.
    capacity: u64,
    tokens: u64,
    /// Refill rate in tokens (bytes) per second.
    rate: u64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate_bytes_per_sec: u64) -> Self {
        Self {
            state: Mutex::new(Bucket {
                capacity: rate_bytes_per_sec,
                tokens: rate_bytes_per_sec,
                rate: rate_bytes_per_sec,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take `amount` tokens, sleeping until enough have accumulated.
    /// Chunks larger than the capacity are admitted once the bucket is full,
    /// so a tiny rate cannot deadlock against a large receive buffer.
    pub fn acquire(&self, amount: u64) {
        if amount == 0 {
            return;
        }
        loop {
            let wait = {
                let mut bucket = self.state.lock().unwrap();
                if bucket.rate == 0 {
                    return;
                }
                bucket.refill();
                let want = amount.min(bucket.capacity);
                if bucket.tokens >= want {
                    bucket.tokens -= want;
                    return;
                }
                let shortfall = want - bucket.tokens;
                Duration::from_secs_f64(shortfall as f64 / bucket.rate as f64)
            };
            std::thread::sleep(wait);
        }
    }
}

impl Bucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        let add = (elapsed.as_secs_f64() * self.rate as f64) as u64;
        if add > 0 {
            self.tokens = (self.tokens + add).min(self.capacity);
            self.last_refill = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_never_blocks() {
        let bucket = TokenBucket::new(0);
        let start = Instant::now();
        for _ in 0..1_000 {
            bucket.acquire(1 << 20);
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn initial_burst_up_to_capacity() {
        let bucket = TokenBucket::new(10_000);
        let start = Instant::now();
        bucket.acquire(10_000);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn drained_bucket_waits_for_refill() {
        let bucket = TokenBucket::new(100_000);
        bucket.acquire(100_000);
        let start = Instant::now();
        // 10k tokens at 100k/s is a ~100ms wait.
        bucket.acquire(10_000);
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(70), "waited {:?}", waited);
        assert!(waited < Duration::from_millis(500), "waited {:?}", waited);
    }

    #[test]
    fn oversized_chunk_admitted_at_capacity() {
        let bucket = TokenBucket::new(1_000);
        bucket.acquire(1_000);
        let start = Instant::now();
        // Twice the capacity still clears once the bucket refills to full.
        bucket.acquire(2_000);
        assert!(start.elapsed() < Duration::from_secs(3));
    }
}
