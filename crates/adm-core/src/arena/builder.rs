//! Builder for creating and preallocating the destination file.

use std::fs::File;
use std::io;
use std::path::Path;

use super::writer::ArenaWriter;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Builder for a fresh destination file. Call `preallocate` then `build` to
/// get an `ArenaWriter` that supports concurrent `write_at` from multiple tasks.
pub struct ArenaBuilder {
    file: File,
    path: std::path::PathBuf,
}

impl ArenaBuilder {
    /// Create (or truncate) the destination file, making parent directories first.
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(ArenaBuilder {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Preallocate `size` bytes so the file occupies its full length up front.
    /// On Unix tries `posix_fallocate` for real block allocation; falls back
    /// to `set_len` on failure or non-Unix. A size of 0 (unknown length) is a no-op.
    pub fn preallocate(self, size: u64) -> io::Result<Self> {
        if size == 0 {
            return Ok(self);
        }
        #[cfg(unix)]
        {
            let fd = self.file.as_raw_fd();
            let r = unsafe { libc::posix_fallocate(fd, 0, size as libc::off_t) };
            if r == 0 {
                return Ok(self);
            }
            if r == libc::ENOSPC {
                return Err(io::Error::from_raw_os_error(r));
            }
            tracing::debug!(errno = r, "posix_fallocate failed, falling back to set_len");
        }
        self.file.set_len(size)?;
        Ok(self)
    }

    /// Finish building and return a writer that can be shared for concurrent writes.
    pub fn build(self) -> ArenaWriter {
        ArenaWriter::from_file_and_path(self.file, self.path)
    }
}
