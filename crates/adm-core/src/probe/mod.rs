//! HTTP metadata probing.
//!
//! Issues a HEAD (falling back to a `Range: bytes=0-0` GET when HEAD is
//! blocked or inconclusive) to learn the resource's length, range support,
//! server-suggested filename, mime type, and post-redirect URL. Probing
//! never fails hard: any error degrades to "unknown size, no ranges" so the
//! engine can fall back to a single-connection download.

mod parse;

use anyhow::{Context, Result};
use std::str;
use std::time::Duration;

const HEAD_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_REDIRECTS: u32 = 10;

/// What a probe learned about a URL.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// Total size in bytes; 0 when the server did not report one.
    pub total_size: u64,
    /// True when byte-range requests are expected to work.
    pub supports_range: bool,
    /// Filename suggested by `Content-Disposition`, if any.
    pub filename: Option<String>,
    /// Media type from `Content-Type`, parameters stripped.
    pub mime: Option<String>,
    /// URL after following the redirect chain.
    pub final_url: String,
}

impl ProbeResult {
    /// The fail-open result: single-connection fallback, nothing known.
    fn unknown(url: &str) -> Self {
        Self {
            total_size: 0,
            supports_range: false,
            filename: None,
            mime: None,
            final_url: url.to_string(),
        }
    }
}

/// Request headers every probe sends.
#[derive(Debug, Clone, Default)]
pub struct ProbeRequest<'a> {
    pub user_agent: &'a str,
    pub referrer: Option<&'a str>,
}

/// Probe `url`, degrading to the fail-open tuple on any failure.
///
/// Runs on the current thread; call from `spawn_blocking` in async code.
pub fn probe(url: &str, req: &ProbeRequest<'_>) -> ProbeResult {
    match probe_best_effort(url, req) {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(url, "probe failed, falling back to single stream: {:#}", e);
            ProbeResult::unknown(url)
        }
    }
}

/// Tries HEAD first; when HEAD is refused or leaves size/ranges unknown,
/// also tries a one-byte ranged GET and merges what it learned.
pub fn probe_best_effort(url: &str, req: &ProbeRequest<'_>) -> Result<ProbeResult> {
    match probe_head(url, req) {
        Ok(r) => {
            if r.supports_range && r.total_size > 0 {
                return Ok(r);
            }
            match probe_range0(url, req) {
                Ok(r2) => Ok(merge(r, r2)),
                Err(_) => Ok(r),
            }
        }
        Err(_) => probe_range0(url, req),
    }
}

fn merge(mut head: ProbeResult, ranged: ProbeResult) -> ProbeResult {
    head.supports_range |= ranged.supports_range;
    if head.total_size == 0 {
        head.total_size = ranged.total_size;
    }
    if head.filename.is_none() {
        head.filename = ranged.filename;
    }
    if head.mime.is_none() {
        head.mime = ranged.mime;
    }
    head
}

/// HEAD probe: returns Err on transport failure or non-2xx so the caller can
/// fall back to the ranged GET probe.
fn probe_head(url: &str, req: &ProbeRequest<'_>) -> Result<ProbeResult> {
    let (easy, headers) = perform(url, req, true, None)?;
    let code = easy.response_code().context("no response code")?;
    if !(200..300).contains(&code) {
        anyhow::bail!("HEAD {} returned HTTP {}", url, code);
    }
    Ok(build_result(&easy, url, &headers.into_inner(), false))
}

/// `Range: bytes=0-0` GET probe. A 206 proves range support even when
/// `Accept-Ranges` is missing, and `Content-Range` reveals the total size.
fn probe_range0(url: &str, req: &ProbeRequest<'_>) -> Result<ProbeResult> {
    let (easy, headers) = perform(url, req, false, Some("0-0"))?;
    let code = easy.response_code().context("no response code")?;
    if !(200..300).contains(&code) {
        anyhow::bail!("GET range probe {} returned HTTP {}", url, code);
    }
    let lines = headers.into_inner();
    let got_partial = code == 206;
    let mut r = build_result(&easy, url, &lines, got_partial);
    if got_partial {
        r.supports_range = true;
        if let Some(total) = parse::content_range_total(&lines) {
            r.total_size = total;
        }
    }
    Ok(r)
}

/// Collected header lines of the final response in a redirect chain.
struct HeaderLines(std::sync::Arc<std::sync::Mutex<Vec<String>>>);

impl HeaderLines {
    fn into_inner(self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

fn perform(
    url: &str,
    req: &ProbeRequest<'_>,
    head: bool,
    range: Option<&str>,
) -> Result<(curl::easy::Easy, HeaderLines)> {
    let collected = std::sync::Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
    let sink = std::sync::Arc::clone(&collected);

    let mut easy = curl::easy::Easy::new();
    easy.url(url).context("invalid URL")?;
    if head {
        easy.nobody(true)?;
    }
    easy.follow_location(true)?;
    easy.max_redirections(MAX_REDIRECTS)?;
    easy.timeout(HEAD_TIMEOUT)?;
    easy.useragent(req.user_agent)?;
    if let Some(r) = range {
        easy.range(r)?;
    }

    let mut list = curl::easy::List::new();
    list.append("Accept: */*")?;
    if let Some(referrer) = req.referrer {
        list.append(&format!("Referer: {}", referrer.trim()))?;
    }
    easy.http_headers(list)?;

    {
        let mut transfer = easy.transfer();
        transfer.header_function(move |data| {
            if let Ok(s) = str::from_utf8(data) {
                let line = s.trim_end();
                let mut lines = sink.lock().unwrap();
                // curl emits one header block per hop; keep only the final response's.
                if line.starts_with("HTTP/") {
                    lines.clear();
                }
                lines.push(line.to_string());
            }
            true
        })?;
        // Drop any body bytes (only the 0-0 probe produces one).
        transfer.write_function(|data| Ok(data.len()))?;
        transfer.perform().context("probe request failed")?;
    }

    Ok((easy, HeaderLines(collected)))
}

fn build_result(
    easy: &curl::easy::Easy,
    requested_url: &str,
    lines: &[String],
    got_partial: bool,
) -> ProbeResult {
    let parsed = parse::parse_headers(lines);
    let final_url = easy
        .effective_url()
        .ok()
        .flatten()
        .filter(|u| !u.is_empty())
        .unwrap_or(requested_url)
        .to_string();

    let total_size = parsed.content_length.unwrap_or(0);
    // `Accept-Ranges: bytes` is believed outright. An absent header is not:
    // `probe_best_effort` settles those cases with a real one-byte range GET,
    // where a 206 proves support and a 200 rules it out.
    let supports_range = got_partial
        || parsed
            .accept_ranges
            .as_deref()
            .map_or(false, |v| v.eq_ignore_ascii_case("bytes"));

    ProbeResult {
        total_size,
        supports_range,
        filename: parsed
            .content_disposition
            .as_deref()
            .and_then(crate::naming::parse_content_disposition_filename),
        mime: parsed.mime,
        final_url,
    }
}
