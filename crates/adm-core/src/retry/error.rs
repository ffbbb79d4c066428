//! Fetch error type carried through retry classification.

use std::fmt;
use std::time::{Duration, SystemTime};

/// Error from a single fetch attempt (probe, segment, or single-stream GET).
/// Typed so the policy can classify before the engine converts to anyhow.
#[derive(Debug)]
pub enum FetchError {
    /// libcurl reported an error (timeout, connection, etc.).
    Curl(curl::Error),
    /// Non-2xx response. `retry_after` is the parsed `Retry-After` header, if any.
    Http {
        code: u16,
        retry_after: Option<Duration>,
    },
    /// A range request was answered with 200 while partial content was required.
    RangeNotSupported,
    /// Transfer ended early: fewer bytes than the requested range.
    Partial { expected: u64, received: u64 },
    /// Write to the target file failed (disk full, permissions). Not retried.
    Disk(std::io::Error),
    /// Torn down by a pause or cancel flag. Not retried.
    Aborted,
}

impl FetchError {
    /// Server-mandated delay, when the failing response carried one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Curl(e) => write!(f, "{}", e),
            FetchError::Http { code, .. } => write!(f, "HTTP {}", code),
            FetchError::RangeNotSupported => write!(f, "server ignored range request"),
            FetchError::Partial { expected, received } => {
                write!(f, "partial transfer: expected {} bytes, got {}", expected, received)
            }
            FetchError::Disk(e) => write!(f, "disk: {}", e),
            FetchError::Aborted => write!(f, "aborted"),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Curl(e) => Some(e),
            FetchError::Disk(e) => Some(e),
            _ => None,
        }
    }
}

/// Parse a `Retry-After` header value: delta-seconds, or an HTTP-date
/// (RFC 1123/850/asctime) from which the remaining wait is computed.
/// Dates already in the past mean no wait.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = httpdate::parse_http_date(value).ok()?;
    Some(
        when.duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_delta_seconds() {
        assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after(" 120 "), Some(Duration::from_secs(120)));
    }

    #[test]
    fn retry_after_http_date_in_the_past_means_no_wait() {
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn retry_after_http_date_in_the_future_waits() {
        let wait = parse_retry_after("Fri, 31 Dec 2100 23:59:59 GMT").unwrap();
        assert!(wait > Duration::from_secs(3600), "wait {:?}", wait);
    }

    #[test]
    fn retry_after_garbage_ignored() {
        assert_eq!(parse_retry_after("soon"), None);
        assert_eq!(parse_retry_after(""), None);
    }
}
