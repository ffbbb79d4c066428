//! Single byte-range GET writing to the arena at segment offsets.
//!
//! One fetcher per incomplete segment, running on a blocking thread. Each
//! attempt asks for `bytes=<start+downloaded>-<end>` so progress survives
//! retries and pause/resume. Chunks pass through the token bucket before the
//! positional write; a low-speed watchdog tears down responses that go
//! silent. Terminal outcomes are reported as typed events to the session
//! supervisor; live byte counts are kept in shared atomics.

mod worker;

use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;
use std::time::Duration;

use crate::arena::ArenaWriter;
use crate::errors::ErrorKind;
use crate::pacer::TokenBucket;
use crate::retry::RetryConfig;

/// Event sent by a fetcher to its download's session supervisor.
#[derive(Debug, Clone)]
pub enum FetchEvent {
    /// Best-effort progress tick; the atomic counters stay authoritative.
    Progress {
        index: usize,
        downloaded: u64,
        chunk: u64,
    },
    /// The segment's full range is on disk.
    Complete { index: usize },
    /// Torn down by the pause flag with progress intact.
    Paused { index: usize },
    /// Retries exhausted or a fatal failure.
    Error {
        index: usize,
        kind: ErrorKind,
        message: String,
    },
}

/// Byte range owned by one fetcher. `start..=end`, closed interval.
#[derive(Debug, Clone, Copy)]
pub struct SegmentSpan {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl SegmentSpan {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// State shared by all fetchers of one active download.
pub struct FetchContext {
    pub url: String,
    pub referrer: Option<String>,
    pub user_agent: String,
    pub writer: ArenaWriter,
    /// Per-segment downloaded byte counts, indexed by segment index.
    pub counters: Arc<Vec<AtomicU64>>,
    /// Set on pause or cancel; fetchers abort their transfer when it flips.
    pub stop: Arc<AtomicBool>,
    /// Additionally set on cancel, distinguishing it from pause at teardown.
    pub cancelled: Arc<AtomicBool>,
    pub retry: RetryConfig,
    pub stall_timeout: Duration,
    /// Number of planned segments; a 200 answer is only legal when this is 1.
    pub segment_count: usize,
}

/// Fetcher for one segment. `run` blocks until the segment completes, the
/// stop flag fires, or retries are exhausted, then emits one terminal event.
pub struct SegmentFetcher {
    pub(crate) ctx: Arc<FetchContext>,
    pub(crate) span: SegmentSpan,
    pub(crate) bucket: Arc<TokenBucket>,
    pub(crate) events: tokio::sync::mpsc::Sender<FetchEvent>,
}

impl SegmentFetcher {
    pub fn new(
        ctx: Arc<FetchContext>,
        span: SegmentSpan,
        bucket: Arc<TokenBucket>,
        events: tokio::sync::mpsc::Sender<FetchEvent>,
    ) -> Self {
        Self {
            ctx,
            span,
            bucket,
            events,
        }
    }

    /// Download the segment. Call from `spawn_blocking`.
    pub fn run(self) {
        worker::run(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_length_is_inclusive() {
        let s = SegmentSpan {
            index: 0,
            start: 0,
            end: 2_499_999,
        };
        assert_eq!(s.len(), 2_500_000);
        let s = SegmentSpan {
            index: 3,
            start: 42,
            end: 42,
        };
        assert_eq!(s.len(), 1);
    }
}
