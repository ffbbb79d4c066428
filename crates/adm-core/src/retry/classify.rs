//! Classify curl, HTTP, and disk failures into taxonomy tags.

use super::error::FetchError;
use crate::errors::{classify_io, ErrorKind};

/// Classify an HTTP status code for retry decisions.
pub fn classify_http_status(code: u16) -> ErrorKind {
    match code {
        400..=499 => ErrorKind::HttpClientStatus(code),
        500..=599 => ErrorKind::HttpServerStatus(code),
        // Anything else here is a protocol oddity; retrying is the safe default.
        _ => ErrorKind::NetworkTransient,
    }
}

/// Classify a curl error for retry decisions.
///
/// With no hard wall-clock timeout configured, an operation timeout means the
/// low-speed watchdog fired: no bytes within the stall window.
pub fn classify_curl_error(e: &curl::Error) -> ErrorKind {
    if e.is_operation_timedout() {
        return ErrorKind::StallTimeout;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_partial_file()
    {
        return ErrorKind::NetworkTransient;
    }
    // Unknown curl failure: default retryable.
    ErrorKind::NetworkTransient
}

/// Classify a fetch error (curl, HTTP, range, or disk) into an ErrorKind.
pub fn classify(e: &FetchError) -> ErrorKind {
    match e {
        FetchError::Curl(ce) => classify_curl_error(ce),
        FetchError::Http { code, .. } => classify_http_status(*code),
        FetchError::RangeNotSupported => ErrorKind::HttpRangeNotSupported,
        FetchError::Partial { .. } => ErrorKind::NetworkTransient,
        FetchError::Disk(ioe) => classify_io(ioe),
        FetchError::Aborted => ErrorKind::Cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_408_and_429_retryable() {
        assert!(classify_http_status(408).is_retryable());
        assert!(classify_http_status(429).is_retryable());
    }

    #[test]
    fn http_5xx_retryable() {
        assert!(matches!(classify_http_status(500), ErrorKind::HttpServerStatus(500)));
        assert!(classify_http_status(502).is_retryable());
    }

    #[test]
    fn http_4xx_fatal() {
        assert!(!classify_http_status(404).is_retryable());
        assert!(!classify_http_status(403).is_retryable());
        assert!(!classify_http_status(410).is_retryable());
    }

    #[test]
    fn partial_transfer_retryable() {
        let e = FetchError::Partial {
            expected: 100,
            received: 50,
        };
        assert_eq!(classify(&e), ErrorKind::NetworkTransient);
    }

    #[test]
    fn disk_errors_fatal() {
        let e = FetchError::Disk(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only filesystem",
        ));
        assert_eq!(classify(&e), ErrorKind::Permission);
        let e = FetchError::Disk(std::io::Error::from_raw_os_error(libc::ENOSPC));
        assert_eq!(classify(&e), ErrorKind::DiskFull);
    }

    #[test]
    fn range_downgrade_retryable() {
        assert!(classify(&FetchError::RangeNotSupported).is_retryable());
    }

    #[test]
    fn abort_is_cancelled() {
        assert_eq!(classify(&FetchError::Aborted), ErrorKind::Cancelled);
    }
}
