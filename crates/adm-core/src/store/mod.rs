//! SQLite-backed durable state: downloads, segments, schedules.
//!
//! Connection and migrations live in `db`; row CRUD is split by table.
//! Every operation is atomic per call; batch updates run in one transaction
//! so a crash never leaves half-applied progress.

mod db;
mod downloads;
mod schedules;
mod segments;
mod types;


pub use db::Store;
pub use types::{
    new_download_id, unix_timestamp_ms, DownloadId, DownloadPatch, DownloadRow, DownloadStatus,
    Priority, RepeatRule, ScheduleRow, SegmentPatch, SegmentRow, SegmentStatus,
};
