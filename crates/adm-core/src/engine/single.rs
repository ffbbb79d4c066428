//! Single-connection fallback: sequential streaming GET.
//!
//! Used when the server offers no usable range support or no length. The
//! body streams into the arena at a running offset; redirects are followed
//! by libcurl inside a capped chain, never by recursion. A length discovered
//! mid-flight is persisted and triggers a free-space re-check so the
//! transfer fails fast instead of exhausting the disk.

use anyhow::Result;
use std::path::PathBuf;
use std::str;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::arena::{self, ArenaBuilder};
use crate::pacer::TokenBucket;
use crate::retry::{classify, parse_retry_after, run_with_retry, FetchError, RetryConfig};
use crate::store::{DownloadPatch, DownloadRow};

use super::session::SessionOutcome;
use super::{ActiveDownload, DownloadEngine};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_REDIRECTS: u32 = 10;

struct SingleArgs {
    url: String,
    referrer: Option<String>,
    user_agent: String,
    path: PathBuf,
    /// Known length from the probe; 0 when the server never said.
    expected: u64,
    counters: Arc<Vec<AtomicU64>>,
    stop: Arc<AtomicBool>,
    bucket: Arc<TokenBucket>,
    retry: RetryConfig,
    stall_timeout: Duration,
    /// Content-Length seen on the wire, for mid-flight persistence.
    discovered: Arc<AtomicU64>,
}

impl DownloadEngine {
    pub(super) async fn run_single(&self, row: &DownloadRow) -> Result<SessionOutcome> {
        let id = &row.id;
        let path = PathBuf::from(&row.save_path);
        let known_total = row.total_size.max(0) as u64;

        let active = ActiveDownload::new(known_total, 1);
        self.register_active(id, Arc::clone(&active));

        let settings = &self.inner.settings;
        let discovered = Arc::new(AtomicU64::new(0));
        let args = SingleArgs {
            url: row.url.clone(),
            referrer: row.referrer.clone(),
            user_agent: settings.user_agent.clone(),
            path: path.clone(),
            expected: known_total,
            counters: Arc::clone(&active.counters),
            stop: Arc::clone(&active.stop),
            bucket: Arc::new(TokenBucket::new(settings.max_bytes_per_sec)),
            retry: settings.retry,
            stall_timeout: settings.stall_timeout,
            discovered: Arc::clone(&discovered),
        };

        let mut handle = tokio::task::spawn_blocking(move || {
            run_with_retry(&args.retry, "single stream", Some(&args.stop), || {
                attempt(&args)
            })
        });

        // Persist the length as soon as the wire reveals it.
        let mut length_persisted = known_total > 0;
        let result = loop {
            tokio::select! {
                res = &mut handle => break res?,
                _ = tokio::time::sleep(Duration::from_millis(500)) => {
                    let t = discovered.load(Ordering::Relaxed);
                    if !length_persisted && t > 0 {
                        length_persisted = true;
                        active.set_total(t);
                        self.inner
                            .store
                            .update_download(
                                id,
                                DownloadPatch {
                                    total_size: Some(t as i64),
                                    ..Default::default()
                                },
                            )
                            .await?;
                    }
                }
            }
        };

        match result {
            Ok(written) => {
                if known_total == 0 {
                    self.inner
                        .store
                        .update_download(
                            id,
                            DownloadPatch {
                                total_size: Some(written as i64),
                                ..Default::default()
                            },
                        )
                        .await?;
                }
                active.set_total(written);
                let expected_size = if known_total > 0 { known_total } else { written };
                self.verify_and_complete(row, &path, expected_size, &active).await
            }
            Err(FetchError::Aborted) => {
                if active.cancelled.load(Ordering::Relaxed) {
                    let _ = std::fs::remove_file(&path);
                    Ok(SessionOutcome::Cancelled)
                } else {
                    self.inner
                        .store
                        .update_download(
                            id,
                            DownloadPatch {
                                downloaded_bytes: Some(active.downloaded() as i64),
                                ..Default::default()
                            },
                        )
                        .await?;
                    Ok(SessionOutcome::Paused)
                }
            }
            Err(e) => Ok(SessionOutcome::Failed {
                kind: classify(&e),
                message: e.to_string(),
            }),
        }
    }
}

/// One streaming GET from byte zero. Retries restart the file; the path is
/// only taken for non-resumable sources, so there is nothing to keep.
fn attempt(args: &SingleArgs) -> Result<u64, FetchError> {
    if args.stop.load(Ordering::Relaxed) {
        return Err(FetchError::Aborted);
    }
    args.counters[0].store(0, Ordering::Relaxed);

    let writer = ArenaBuilder::create(&args.path)
        .and_then(|b| b.preallocate(args.expected))
        .map_err(FetchError::Disk)?
        .build();

    let mut easy = curl::easy::Easy::new();
    easy.url(&args.url).map_err(FetchError::Curl)?;
    easy.follow_location(true).map_err(FetchError::Curl)?;
    easy.max_redirections(MAX_REDIRECTS).map_err(FetchError::Curl)?;
    easy.useragent(&args.user_agent).map_err(FetchError::Curl)?;
    easy.connect_timeout(CONNECT_TIMEOUT).map_err(FetchError::Curl)?;
    easy.low_speed_limit(1).map_err(FetchError::Curl)?;
    easy.low_speed_time(args.stall_timeout).map_err(FetchError::Curl)?;

    let mut list = curl::easy::List::new();
    // Identity keeps the byte count honest against Content-Length.
    list.append("Accept-Encoding: identity").map_err(FetchError::Curl)?;
    list.append("Connection: keep-alive").map_err(FetchError::Curl)?;
    if let Some(referrer) = &args.referrer {
        list.append(&format!("Referer: {}", referrer.trim()))
            .map_err(FetchError::Curl)?;
    }
    easy.http_headers(list).map_err(FetchError::Curl)?;

    let status = Arc::new(AtomicU32::new(0));
    let retry_after: Arc<Mutex<Option<Duration>>> = Arc::new(Mutex::new(None));
    let disk_error: Arc<Mutex<Option<std::io::Error>>> = Arc::new(Mutex::new(None));

    {
        let mut transfer = easy.transfer();

        let status_hdr = Arc::clone(&status);
        let retry_after_hdr = Arc::clone(&retry_after);
        let discovered_hdr = Arc::clone(&args.discovered);
        let disk_error_hdr = Arc::clone(&disk_error);
        let dir = args.path.parent().map(|p| p.to_path_buf());
        let preflighted = args.expected > 0;
        transfer
            .header_function(move |data| {
                let Ok(s) = str::from_utf8(data) else { return true };
                let line = s.trim_end();
                if line.starts_with("HTTP/") {
                    if let Some(code) = line.split_whitespace().nth(1).and_then(|c| c.parse().ok()) {
                        status_hdr.store(code, Ordering::Relaxed);
                    }
                    *retry_after_hdr.lock().unwrap() = None;
                    return true;
                }
                let Some((name, value)) = line.split_once(':') else { return true };
                let name = name.trim();
                let value = value.trim();
                if name.eq_ignore_ascii_case("retry-after") {
                    *retry_after_hdr.lock().unwrap() = parse_retry_after(value);
                } else if name.eq_ignore_ascii_case("content-length") {
                    if let Ok(len) = value.parse::<u64>() {
                        if (200..300).contains(&status_hdr.load(Ordering::Relaxed)) && len > 0 {
                            discovered_hdr.store(len, Ordering::Relaxed);
                            if !preflighted {
                                if let Some(dir) = &dir {
                                    if !arena::check_free_space(dir, len) {
                                        let _ = disk_error_hdr.lock().unwrap().replace(
                                            std::io::Error::from_raw_os_error(libc::ENOSPC),
                                        );
                                        return false;
                                    }
                                }
                            }
                        }
                    }
                }
                true
            })
            .map_err(FetchError::Curl)?;

        let status_body = Arc::clone(&status);
        let stop = Arc::clone(&args.stop);
        let disk_error_cb = Arc::clone(&disk_error);
        let counters = Arc::clone(&args.counters);
        let bucket = Arc::clone(&args.bucket);
        let writer_cb = writer.clone();
        transfer
            .write_function(move |data| {
                if stop.load(Ordering::Relaxed) {
                    return Ok(0);
                }
                let code = status_body.load(Ordering::Relaxed);
                if !(200..300).contains(&code) {
                    return Ok(data.len());
                }
                bucket.acquire(data.len() as u64);
                let offset = counters[0].load(Ordering::Relaxed);
                if let Err(e) = writer_cb.write_at(offset, data) {
                    let _ = disk_error_cb.lock().unwrap().replace(e);
                    return Ok(0);
                }
                counters[0].fetch_add(data.len() as u64, Ordering::Relaxed);
                Ok(data.len())
            })
            .map_err(FetchError::Curl)?;

        if let Err(e) = transfer.perform() {
            if args.stop.load(Ordering::Relaxed) {
                return Err(FetchError::Aborted);
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
    if !(200..300).contains(&code) {
        return Err(FetchError::Http {
            code,
            retry_after: retry_after.lock().unwrap().take(),
        });
    }

    let written = args.counters[0].load(Ordering::Relaxed);
    let expected = match args.discovered.load(Ordering::Relaxed) {
        0 => args.expected,
        n => n,
    };
    if expected > 0 && written != expected {
        return Err(FetchError::Partial {
            expected,
            received: written,
        });
    }

    writer.sync().map_err(FetchError::Disk)?;
    Ok(written)
}
