//! Failure taxonomy shared by fetchers, the retry policy, and the engine.

use std::fmt;
use std::io;

/// Tag describing why an operation failed. The tag, not the carrying type,
/// decides retryability and how the engine records the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transient network failure: reset, refused, DNS hiccup, timeout.
    NetworkTransient,
    /// No bytes arrived within the stall window on an open response.
    StallTimeout,
    /// HTTP 4xx. Only 408 and 429 are retried.
    HttpClientStatus(u16),
    /// HTTP 5xx; the server may recover.
    HttpServerStatus(u16),
    /// A range request was answered with 200 while more than one segment exists.
    HttpRangeNotSupported,
    /// ENOSPC while allocating or writing.
    DiskFull,
    /// EACCES/EPERM on the target path.
    Permission,
    /// Any other filesystem failure.
    FsIo,
    /// File on disk does not match the advertised length after transfer.
    SizeMismatch,
    /// Whole-file hash differs from the expected checksum.
    ChecksumMismatch,
    /// User-initiated cancellation.
    Cancelled,
    /// Unknown download id.
    NotFound,
    /// Invariant violation; a bug, never retried.
    Internal,
}

impl ErrorKind {
    /// Whether the retry policy may re-attempt an operation that failed this way.
    pub fn is_retryable(self) -> bool {
        match self {
            ErrorKind::NetworkTransient
            | ErrorKind::StallTimeout
            | ErrorKind::HttpServerStatus(_)
            | ErrorKind::HttpRangeNotSupported => true,
            ErrorKind::HttpClientStatus(code) => code == 408 || code == 429,
            ErrorKind::DiskFull
            | ErrorKind::Permission
            | ErrorKind::FsIo
            | ErrorKind::SizeMismatch
            | ErrorKind::ChecksumMismatch
            | ErrorKind::Cancelled
            | ErrorKind::NotFound
            | ErrorKind::Internal => false,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NetworkTransient => write!(f, "transient network error"),
            ErrorKind::StallTimeout => write!(f, "stalled: no data received"),
            ErrorKind::HttpClientStatus(code) => write!(f, "HTTP {}", code),
            ErrorKind::HttpServerStatus(code) => write!(f, "HTTP {}", code),
            ErrorKind::HttpRangeNotSupported => write!(f, "server ignored range request"),
            ErrorKind::DiskFull => write!(f, "disk full"),
            ErrorKind::Permission => write!(f, "permission denied"),
            ErrorKind::FsIo => write!(f, "filesystem error"),
            ErrorKind::SizeMismatch => write!(f, "size mismatch"),
            ErrorKind::ChecksumMismatch => write!(f, "checksum mismatch"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
            ErrorKind::NotFound => write!(f, "download not found"),
            ErrorKind::Internal => write!(f, "internal error"),
        }
    }
}

/// Map an I/O error onto the taxonomy: ENOSPC and permission failures get
/// their own tags so the engine can surface them precisely.
pub fn classify_io(e: &io::Error) -> ErrorKind {
    match e.kind() {
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => {
            if e.raw_os_error() == Some(libc::ENOSPC) {
                ErrorKind::DiskFull
            } else {
                ErrorKind::FsIo
            }
        }
    }
}
