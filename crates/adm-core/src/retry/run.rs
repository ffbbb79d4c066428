//! Retry loop: run a closure until success or policy says stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::classify::classify;
use super::error::FetchError;
use super::policy::RetryConfig;

/// Runs a blocking closure until it succeeds, the error is non-retryable, or
/// retries are exhausted. A `Retry-After` on the failing response overrides
/// the computed backoff. The optional abort flag is honored between attempts
/// so pause/cancel don't have to wait out a long backoff sleep.
pub fn run_with_retry<T, F>(
    cfg: &RetryConfig,
    label: &str,
    abort: Option<&AtomicBool>,
    mut f: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Result<T, FetchError>,
{
    let mut attempt = 0u32;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) => {
                let kind = classify(&e);
                if !kind.is_retryable() || attempt >= cfg.max_retries {
                    return Err(e);
                }
                let delay = e.retry_after().unwrap_or_else(|| cfg.delay_for(attempt));
                tracing::debug!(
                    label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retryable failure: {}",
                    e
                );
                if !sleep_unless_aborted(delay, abort) {
                    return Err(FetchError::Aborted);
                }
                attempt += 1;
            }
        }
    }
}

/// Sleep in short slices so an abort flag interrupts the backoff promptly.
/// Returns false when the flag fired.
fn sleep_unless_aborted(total: Duration, abort: Option<&AtomicBool>) -> bool {
    const SLICE: Duration = Duration::from_millis(100);
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if let Some(flag) = abort {
            if flag.load(Ordering::Relaxed) {
                return false;
            }
        }
        let step = remaining.min(SLICE);
        std::thread::sleep(step);
        remaining -= step;
    }
    abort.map_or(true, |flag| !flag.load(Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;

    fn fast_cfg() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_factor: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let out = run_with_retry(&fast_cfg(), "test", None, || {
            if calls.fetch_add(1, Ordering::Relaxed) < 2 {
                Err(FetchError::Partial {
                    expected: 10,
                    received: 5,
                })
            } else {
                Ok(42u32)
            }
        });
        assert_eq!(out.unwrap(), 42);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn fatal_error_not_retried() {
        let calls = AtomicU32::new(0);
        let out: Result<(), _> = run_with_retry(&fast_cfg(), "test", None, || {
            calls.fetch_add(1, Ordering::Relaxed);
            Err(FetchError::Http {
                code: 404,
                retry_after: None,
            })
        });
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn exhaustion_surfaces_last_error() {
        let calls = AtomicU32::new(0);
        let out: Result<(), _> = run_with_retry(&fast_cfg(), "test", None, || {
            calls.fetch_add(1, Ordering::Relaxed);
            Err(FetchError::Http {
                code: 503,
                retry_after: None,
            })
        });
        assert!(matches!(out, Err(FetchError::Http { code: 503, .. })));
        // first attempt + max_retries
        assert_eq!(calls.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn retry_after_overrides_backoff() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let out = run_with_retry(&fast_cfg(), "test", None, || {
            if calls.fetch_add(1, Ordering::Relaxed) == 0 {
                Err(FetchError::Http {
                    code: 429,
                    retry_after: Some(Duration::from_millis(150)),
                })
            } else {
                Ok(())
            }
        });
        assert!(out.is_ok());
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn abort_flag_interrupts_backoff() {
        let abort = AtomicBool::new(false);
        let calls = AtomicU32::new(0);
        let out: Result<(), _> = run_with_retry(
            &RetryConfig {
                initial_delay: Duration::from_secs(10),
                jitter: false,
                ..fast_cfg()
            },
            "test",
            Some(&abort),
            || {
                calls.fetch_add(1, Ordering::Relaxed);
                abort.store(true, Ordering::Relaxed);
                Err(FetchError::Partial {
                    expected: 1,
                    received: 0,
                })
            },
        );
        assert!(matches!(out, Err(FetchError::Aborted)));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
