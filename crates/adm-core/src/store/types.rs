//! Row types and enums stored by the database.

use crate::checksum::ChecksumType;

/// Download identifier: a UUID rendered as a string.
pub type DownloadId = String;

pub fn new_download_id() -> DownloadId {
    uuid::Uuid::new_v4().to_string()
}

/// Current time as Unix milliseconds (for DB timestamps).
pub fn unix_timestamp_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Download lifecycle state, stored as a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Pending,
    Queued,
    Downloading,
    Paused,
    Verifying,
    Completed,
    /// User-initiated stop; distinct from `Error` so consumers can tell them apart.
    Cancelled,
    Error,
}

impl DownloadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Queued => "queued",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Paused => "paused",
            DownloadStatus::Verifying => "verifying",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Cancelled => "cancelled",
            DownloadStatus::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => DownloadStatus::Pending,
            "queued" => DownloadStatus::Queued,
            "downloading" => DownloadStatus::Downloading,
            "paused" => DownloadStatus::Paused,
            "verifying" => DownloadStatus::Verifying,
            "completed" => DownloadStatus::Completed,
            "cancelled" => DownloadStatus::Cancelled,
            _ => DownloadStatus::Error,
        }
    }

    /// A download in one of these states has no live session.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed | DownloadStatus::Cancelled | DownloadStatus::Error
        )
    }
}

/// Queue priority; higher rank is admitted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "high" => Priority::High,
            "low" => Priority::Low,
            _ => Priority::Normal,
        }
    }

    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 2,
            Priority::Normal => 1,
            Priority::Low => 0,
        }
    }
}

/// Schedule recurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatRule {
    None,
    Daily,
    Weekly,
}

impl RepeatRule {
    pub fn as_str(self) -> &'static str {
        match self {
            RepeatRule::None => "none",
            RepeatRule::Daily => "daily",
            RepeatRule::Weekly => "weekly",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "daily" => RepeatRule::Daily,
            "weekly" => RepeatRule::Weekly,
            _ => RepeatRule::None,
        }
    }

    /// Interval in milliseconds; None for one-shot schedules.
    pub fn interval_ms(self) -> Option<i64> {
        match self {
            RepeatRule::None => None,
            RepeatRule::Daily => Some(24 * 60 * 60 * 1000),
            RepeatRule::Weekly => Some(7 * 24 * 60 * 60 * 1000),
        }
    }
}

/// Per-segment state, stored as a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentStatus {
    Pending,
    Active,
    Paused,
    Completed,
    Error,
}

impl SegmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SegmentStatus::Pending => "pending",
            SegmentStatus::Active => "active",
            SegmentStatus::Paused => "paused",
            SegmentStatus::Completed => "completed",
            SegmentStatus::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => SegmentStatus::Pending,
            "active" => SegmentStatus::Active,
            "paused" => SegmentStatus::Paused,
            "completed" => SegmentStatus::Completed,
            _ => SegmentStatus::Error,
        }
    }
}

/// One row of the `downloads` table.
#[derive(Debug, Clone)]
pub struct DownloadRow {
    pub id: DownloadId,
    /// Current URL, after redirect resolution at probe time.
    pub url: String,
    pub referrer: Option<String>,
    pub mime: Option<String>,
    pub filename: String,
    /// Absolute destination path.
    pub save_path: String,
    /// Total bytes; 0 means unknown.
    pub total_size: i64,
    pub downloaded_bytes: i64,
    /// Server advertised range support and a positive length.
    pub resumable: bool,
    pub status: DownloadStatus,
    /// Planned parallelism; always 1 when not resumable.
    pub threads: i64,
    pub priority: Priority,
    pub created_at: i64,
    pub completed_at: Option<i64>,
    pub checksum: Option<String>,
    pub checksum_type: Option<ChecksumType>,
    pub error: Option<String>,
}

/// Partial update for a download row. `None` leaves a column untouched;
/// the doubly-optional fields distinguish "leave" from "set NULL".
#[derive(Debug, Clone, Default)]
pub struct DownloadPatch {
    pub url: Option<String>,
    pub mime: Option<String>,
    pub filename: Option<String>,
    pub save_path: Option<String>,
    pub total_size: Option<i64>,
    pub downloaded_bytes: Option<i64>,
    pub resumable: Option<bool>,
    pub status: Option<DownloadStatus>,
    pub threads: Option<i64>,
    pub priority: Option<Priority>,
    pub completed_at: Option<Option<i64>>,
    pub error: Option<Option<String>>,
}

/// One row of the `segments` table. `(download_id, seg_index)` is unique;
/// `start_byte..=end_byte` is a closed interval.
#[derive(Debug, Clone)]
pub struct SegmentRow {
    pub download_id: DownloadId,
    pub seg_index: i64,
    pub start_byte: i64,
    pub end_byte: i64,
    pub downloaded_bytes: i64,
    pub status: SegmentStatus,
}

impl SegmentRow {
    pub fn len(&self) -> i64 {
        self.end_byte - self.start_byte + 1
    }

    pub fn is_complete(&self) -> bool {
        self.downloaded_bytes >= self.len()
    }
}

/// Partial update for a segment row.
#[derive(Debug, Clone, Default)]
pub struct SegmentPatch {
    pub downloaded_bytes: Option<i64>,
    pub status: Option<SegmentStatus>,
}

/// One row of the `schedules` table.
#[derive(Debug, Clone)]
pub struct ScheduleRow {
    pub id: i64,
    pub download_id: DownloadId,
    /// Epoch milliseconds of the next trigger.
    pub scheduled_time: i64,
    pub repeat: RepeatRule,
    pub auto_shutdown: bool,
    pub enabled: bool,
}
