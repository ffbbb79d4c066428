//! Minimal HTTP/1.1 server with HEAD and Range GET support for integration
//! tests.
//!
//! Serves a single static body per instance. Options simulate servers that
//! block HEAD, ignore ranges, throttle with 429 + Retry-After, or drip the
//! body slowly so tests can pause mid-transfer.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RangeServerOptions {
    /// If false, HEAD returns 405 (simulates servers that block HEAD).
    pub head_allowed: bool,
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// If false, omit `Accept-Ranges: bytes` even if ranges work.
    pub advertise_ranges: bool,
    /// Answer this many GETs with 429 before serving normally.
    pub fail_first_gets_with_429: usize,
    /// `Retry-After` seconds sent on 429 responses.
    pub retry_after_secs: u64,
    /// Sleep between body chunks; lets tests interrupt a transfer.
    pub chunk_delay: Option<Duration>,
    /// Body chunk size when `chunk_delay` is set.
    pub chunk_size: usize,
    /// Optional Content-Disposition header value.
    pub content_disposition: Option<String>,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            head_allowed: true,
            support_ranges: true,
            advertise_ranges: true,
            fail_first_gets_with_429: 0,
            retry_after_secs: 1,
            chunk_delay: None,
            chunk_size: 4 * 1024,
            content_disposition: None,
        }
    }
}

/// Starts a server in a background thread serving `body`. Returns the base
/// URL (e.g. `http://127.0.0.1:12345/`). Runs until the process exits.
pub fn start(body: Vec<u8>) -> String {
    start_with_options(body, RangeServerOptions::default())
}

pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let opts = Arc::new(opts);
    let remaining_429 = Arc::new(AtomicUsize::new(opts.fail_first_gets_with_429));
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let opts = Arc::clone(&opts);
            let remaining_429 = Arc::clone(&remaining_429);
            thread::spawn(move || handle(stream, &body, &opts, &remaining_429));
        }
    });
    format!("http://127.0.0.1:{}/", port)
}

fn handle(
    mut stream: std::net::TcpStream,
    body: &[u8],
    opts: &RangeServerOptions,
    remaining_429: &AtomicUsize,
) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) => return,
        Ok(n) => n,
        Err(_) => return,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => return,
    };
    let (method, range) = parse_request(request);
    let total = body.len() as u64;

    let disposition = opts
        .content_disposition
        .as_deref()
        .map(|v| format!("Content-Disposition: {}\r\n", v))
        .unwrap_or_default();
    let accept_ranges = if opts.advertise_ranges && opts.support_ranges {
        "Accept-Ranges: bytes\r\n"
    } else {
        ""
    };

    if method.eq_ignore_ascii_case("HEAD") {
        if !opts.head_allowed {
            let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
            return;
        }
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n{}{}\r\n",
            total, accept_ranges, disposition
        );
        let _ = stream.write_all(response.as_bytes());
        return;
    }

    if method.eq_ignore_ascii_case("GET") {
        // Throttle the first N GETs when configured.
        loop {
            let left = remaining_429.load(Ordering::Relaxed);
            if left == 0 {
                break;
            }
            if remaining_429
                .compare_exchange(left, left - 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                let response = format!(
                    "HTTP/1.1 429 Too Many Requests\r\nRetry-After: {}\r\nContent-Length: 0\r\n\r\n",
                    opts.retry_after_secs
                );
                let _ = stream.write_all(response.as_bytes());
                return;
            }
        }

        let (status, content_range, slice) = if opts.support_ranges {
            match range {
                Some((start, end_incl)) => {
                    let start = start.min(total);
                    let end_incl = end_incl.min(total.saturating_sub(1));
                    if start > end_incl {
                        let _ = stream.write_all(
                            format!(
                                "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{}\r\nContent-Length: 0\r\n\r\n",
                                total
                            )
                            .as_bytes(),
                        );
                        return;
                    }
                    let s = start as usize;
                    let e = (end_incl + 1) as usize;
                    (
                        "206 Partial Content",
                        Some(format!("bytes {}-{}/{}", start, end_incl, total)),
                        &body[s..e],
                    )
                }
                None => ("200 OK", None, body),
            }
        } else {
            ("200 OK", None, body)
        };

        let content_range = content_range
            .map(|v| format!("Content-Range: {}\r\n", v))
            .unwrap_or_default();
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\n{}{}{}\r\n",
            status,
            slice.len(),
            content_range,
            accept_ranges,
            disposition
        );
        if stream.write_all(response.as_bytes()).is_err() {
            return;
        }
        match opts.chunk_delay {
            None => {
                let _ = stream.write_all(slice);
            }
            Some(delay) => {
                for chunk in slice.chunks(opts.chunk_size.max(1)) {
                    if stream.write_all(chunk).is_err() {
                        return;
                    }
                    let _ = stream.flush();
                    thread::sleep(delay);
                }
            }
        }
        return;
    }

    let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
}

/// Returns (method, optional (start, end_inclusive) from `Range: bytes=X-Y`).
fn parse_request(request: &str) -> (&str, Option<(u64, u64)>) {
    let mut method = "";
    let mut range = None;
    for line in request.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if method.is_empty() {
            method = line.split_whitespace().next().unwrap_or("");
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                let value = value.trim();
                if let Some(part) = value.strip_prefix("bytes=") {
                    if let Some((a, b)) = part.split_once('-') {
                        let start = a.trim().parse::<u64>().unwrap_or(0);
                        let end_incl = if b.trim().is_empty() {
                            u64::MAX
                        } else {
                            b.trim().parse::<u64>().unwrap_or(0)
                        };
                        range = Some((start, end_incl));
                    }
                }
            }
        }
    }
    (method, range)
}
