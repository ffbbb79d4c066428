//! Target-file lifecycle and disk I/O.
//!
//! Preallocates the destination file to its full size (fallocate on Linux
//! when available, else set_len), supports concurrent positional writes
//! (pwrite) from segment fetchers, resume-open of an existing partial file,
//! and size/free-space checks. Fetchers only ever write; the file is read
//! back solely for hash verification after transfer.

mod builder;
mod writer;

pub use builder::ArenaBuilder;
pub use writer::ArenaWriter;

use std::path::Path;

/// True when the on-disk length of `path` equals `expected`.
pub fn verify_size(path: &Path, expected: u64) -> bool {
    std::fs::metadata(path)
        .map(|m| m.len() == expected)
        .unwrap_or(false)
}

/// Bytes available to unprivileged users on the filesystem holding `dir`.
/// `None` when the answer cannot be determined; callers treat that as enough.
#[cfg(unix)]
pub fn free_space_for(dir: &Path) -> Option<u64> {
    use std::os::unix::ffi::OsStrExt;
    let c_path = std::ffi::CString::new(dir.as_os_str().as_bytes()).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return None;
    }
    Some(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
pub fn free_space_for(_dir: &Path) -> Option<u64> {
    None
}

/// Best-effort preflight: false only when the filesystem definitely lacks
/// `need` bytes. Indeterminate answers pass so exotic mounts don't block adds.
pub fn check_free_space(dir: &Path, need: u64) -> bool {
    match free_space_for(dir) {
        Some(avail) => avail >= need,
        None => true,
    }
}
