//! The blocking fetch loop: retried curl transfers with offset writes.

use std::str;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::retry::{classify, parse_retry_after, run_with_retry, FetchError};

use super::{FetchEvent, SegmentFetcher};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_REDIRECTS: u32 = 10;

pub(super) fn run(fetcher: SegmentFetcher) {
    let index = fetcher.span.index;
    let label = format!("segment {}", index);

    let result = run_with_retry(&fetcher.ctx.retry, &label, Some(&fetcher.ctx.stop), || {
        attempt(&fetcher)
    });

    let event = match result {
        Ok(()) => FetchEvent::Complete { index },
        Err(FetchError::Aborted) => {
            if fetcher.ctx.cancelled.load(Ordering::Relaxed) {
                FetchEvent::Error {
                    index,
                    kind: crate::errors::ErrorKind::Cancelled,
                    message: "cancelled".to_string(),
                }
            } else {
                FetchEvent::Paused { index }
            }
        }
        Err(e) => FetchEvent::Error {
            index,
            kind: classify(&e),
            message: e.to_string(),
        },
    };
    let _ = fetcher.events.blocking_send(event);
}

/// One curl transfer for the remainder of the segment.
fn attempt(fetcher: &SegmentFetcher) -> Result<(), FetchError> {
    let ctx = &fetcher.ctx;
    let span = fetcher.span;

    if ctx.stop.load(Ordering::Relaxed) {
        return Err(FetchError::Aborted);
    }

    let already = ctx.counters[span.index].load(Ordering::Relaxed);
    let total = span.len();
    if already >= total {
        return Ok(());
    }
    let offset = span.start + already;
    // A 200 answer replays the body from byte zero, so it only lines up with
    // our writes when this is the sole segment and nothing is on disk yet.
    let allow_200 = ctx.segment_count == 1 && offset == 0;

    let mut easy = curl::easy::Easy::new();
    easy.url(&ctx.url).map_err(FetchError::Curl)?;
    easy.follow_location(true).map_err(FetchError::Curl)?;
    easy.max_redirections(MAX_REDIRECTS).map_err(FetchError::Curl)?;
    easy.useragent(&ctx.user_agent).map_err(FetchError::Curl)?;
    easy.connect_timeout(CONNECT_TIMEOUT).map_err(FetchError::Curl)?;
    // Stall watchdog: an open response that delivers no bytes for the
    // configured window is torn down and the attempt classified retryable.
    easy.low_speed_limit(1).map_err(FetchError::Curl)?;
    easy.low_speed_time(ctx.stall_timeout).map_err(FetchError::Curl)?;
    easy.range(&format!("{}-{}", offset, span.end))
        .map_err(FetchError::Curl)?;

    let mut list = curl::easy::List::new();
    // Compressed bodies would break byte accounting against the range.
    list.append("Accept-Encoding: identity").map_err(FetchError::Curl)?;
    list.append("Connection: keep-alive").map_err(FetchError::Curl)?;
    if let Some(referrer) = &ctx.referrer {
        list.append(&format!("Referer: {}", referrer.trim()))
            .map_err(FetchError::Curl)?;
    }
    easy.http_headers(list).map_err(FetchError::Curl)?;

    let status = Arc::new(AtomicU32::new(0));
    let retry_after: Arc<Mutex<Option<Duration>>> = Arc::new(Mutex::new(None));
    let disk_error: Arc<Mutex<Option<std::io::Error>>> = Arc::new(Mutex::new(None));
    let range_ignored = Arc::new(AtomicBool::new(false));
    let written = Arc::new(AtomicU64::new(0));

    {
        let mut transfer = easy.transfer();

        let status_hdr = Arc::clone(&status);
        let retry_after_hdr = Arc::clone(&retry_after);
        transfer
            .header_function(move |data| {
                if let Ok(s) = str::from_utf8(data) {
                    let line = s.trim_end();
                    // One header block per redirect hop; the newest wins.
                    if line.starts_with("HTTP/") {
                        if let Some(code) = parse_status_line(line) {
                            status_hdr.store(code, Ordering::Relaxed);
                        }
                        *retry_after_hdr.lock().unwrap() = None;
                    } else if let Some((name, value)) = line.split_once(':') {
                        if name.trim().eq_ignore_ascii_case("retry-after") {
                            *retry_after_hdr.lock().unwrap() = parse_retry_after(value.trim());
                        }
                    }
                }
                true
            })
            .map_err(FetchError::Curl)?;

        let status_body = Arc::clone(&status);
        let stop = Arc::clone(&ctx.stop);
        let range_ignored_cb = Arc::clone(&range_ignored);
        let disk_error_cb = Arc::clone(&disk_error);
        let written_cb = Arc::clone(&written);
        let counters = Arc::clone(&ctx.counters);
        let writer = ctx.writer.clone();
        let bucket = Arc::clone(&fetcher.bucket);
        let events = fetcher.events.clone();
        let seg_index = span.index;
        transfer
            .write_function(move |data| {
                if stop.load(Ordering::Relaxed) {
                    return Ok(0);
                }
                let code = status_body.load(Ordering::Relaxed);
                if code == 200 && !allow_200 {
                    // Abort before anything lands at the wrong offset.
                    range_ignored_cb.store(true, Ordering::Relaxed);
                    return Ok(0);
                }
                if !(200..300).contains(&code) {
                    // Error body (a 429 page and friends): swallow, never write.
                    return Ok(data.len());
                }
                bucket.acquire(data.len() as u64);
                let done = written_cb.load(Ordering::Relaxed);
                if let Err(e) = writer.write_at(offset + done, data) {
                    let _ = disk_error_cb.lock().unwrap().replace(e);
                    return Ok(0);
                }
                written_cb.fetch_add(data.len() as u64, Ordering::Relaxed);
                let downloaded = counters[seg_index]
                    .fetch_add(data.len() as u64, Ordering::Relaxed)
                    + data.len() as u64;
                let _ = events.try_send(FetchEvent::Progress {
                    index: seg_index,
                    downloaded,
                    chunk: data.len() as u64,
                });
                Ok(data.len())
            })
            .map_err(FetchError::Curl)?;

        if let Err(e) = transfer.perform() {
            if ctx.stop.load(Ordering::Relaxed) {
                return Err(FetchError::Aborted);
            }
            if range_ignored.load(Ordering::Relaxed) {
                return Err(FetchError::RangeNotSupported);
            }
            if e.is_write_error() {
                if let Some(io_err) = disk_error.lock().unwrap().take() {
                    return Err(FetchError::Disk(io_err));
                }
            }
            return Err(FetchError::Curl(e));
        }
    }

    let code = easy.response_code().map_err(FetchError::Curl)? as u16;
    if code == 200 && !allow_200 {
        return Err(FetchError::RangeNotSupported);
    }
    if !(200..300).contains(&code) {
        return Err(FetchError::Http {
            code,
            retry_after: retry_after.lock().unwrap().take(),
        });
    }

    let received = written.load(Ordering::Relaxed);
    let expected = total - already;
    if received != expected {
        return Err(FetchError::Partial { expected, received });
    }

    Ok(())
}

/// Code from an `HTTP/1.1 206 Partial Content` status line.
fn parse_status_line(line: &str) -> Option<u32> {
    line.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_parsing() {
        assert_eq!(parse_status_line("HTTP/1.1 206 Partial Content"), Some(206));
        assert_eq!(parse_status_line("HTTP/2 200"), Some(200));
        assert_eq!(parse_status_line("HTTP/1.1"), None);
    }

    #[test]
    fn retry_after_accepts_both_header_forms() {
        assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
        assert!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT").is_some());
    }
}
