//! Concurrent offset writer for the destination file.

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;
#[cfg(unix)]
use std::os::unix::fs::FileExt;

/// Writer for the destination file. Safe to clone and use from multiple
/// tasks; each `write_at` is independent (pwrite-style) and never moves a
/// shared cursor. Concurrent writes to disjoint ranges are safe.
#[derive(Clone)]
pub struct ArenaWriter {
    file: Arc<File>,
    path: std::path::PathBuf,
}

impl ArenaWriter {
    /// Create from an open file and path (used by ArenaBuilder).
    pub(crate) fn from_file_and_path(file: File, path: std::path::PathBuf) -> Self {
        Self {
            file: Arc::new(file),
            path,
        }
    }

    /// Open an existing partial file for resume (read+write, no truncation).
    /// Fails with NotFound when the file is gone.
    pub fn open_resume(path: &Path) -> io::Result<Self> {
        let file = File::options().read(true).write(true).open(path)?;
        Ok(ArenaWriter {
            file: Arc::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Write `data` at `offset` without touching any shared cursor.
    #[cfg(unix)]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.file.write_all_at(data, offset)
    }

    /// Non-Unix fallback: seek + write on a cloned handle. Not pwrite, so
    /// each clone keeps its own cursor.
    #[cfg(not(unix))]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let mut f = (*self.file).try_clone()?;
        f.seek(SeekFrom::Start(offset))?;
        f.write_all(data)
    }

    /// Sync file data to disk. Call before verification for durability.
    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    /// Path this writer targets.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
