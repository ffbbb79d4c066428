//! Download row CRUD.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::db::Store;
use super::types::{DownloadId, DownloadPatch, DownloadRow, DownloadStatus, Priority};
use crate::checksum::ChecksumType;

pub(super) fn row_to_download(row: &SqliteRow) -> DownloadRow {
    let status: String = row.get("status");
    let priority: String = row.get("priority");
    let checksum_type: Option<String> = row.get("checksum_type");
    DownloadRow {
        id: row.get("id"),
        url: row.get("url"),
        referrer: row.get("referrer"),
        mime: row.get("mime"),
        filename: row.get("filename"),
        save_path: row.get("save_path"),
        total_size: row.get("total_size"),
        downloaded_bytes: row.get("downloaded_bytes"),
        resumable: row.get::<i64, _>("resumable") != 0,
        status: DownloadStatus::from_str(&status),
        threads: row.get("threads"),
        priority: Priority::from_str(&priority),
        created_at: row.get("created_at"),
        completed_at: row.get("completed_at"),
        checksum: row.get("checksum"),
        checksum_type: checksum_type.as_deref().and_then(ChecksumType::parse),
        error: row.get("error"),
    }
}

const SELECT_COLUMNS: &str = r#"
    id, url, referrer, mime, filename, save_path,
    total_size, downloaded_bytes, resumable, status, threads, priority,
    created_at, completed_at, checksum, checksum_type, error
"#;

impl Store {
    pub async fn insert_download(&self, d: &DownloadRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO downloads (
                id, url, referrer, mime, filename, save_path,
                total_size, downloaded_bytes, resumable, status, threads, priority,
                created_at, completed_at, checksum, checksum_type, error
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            "#,
        )
        .bind(&d.id)
        .bind(&d.url)
        .bind(&d.referrer)
        .bind(&d.mime)
        .bind(&d.filename)
        .bind(&d.save_path)
        .bind(d.total_size)
        .bind(d.downloaded_bytes)
        .bind(d.resumable as i64)
        .bind(d.status.as_str())
        .bind(d.threads)
        .bind(d.priority.as_str())
        .bind(d.created_at)
        .bind(d.completed_at)
        .bind(&d.checksum)
        .bind(d.checksum_type.map(ChecksumType::as_str))
        .bind(&d.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_download(&self, id: &str) -> Result<Option<DownloadRow>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM downloads WHERE id = ?1",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_download))
    }

    /// All downloads, newest first.
    pub async fn list_downloads(&self) -> Result<Vec<DownloadRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM downloads ORDER BY created_at DESC",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_download).collect())
    }

    pub async fn list_by_status(&self, status: DownloadStatus) -> Result<Vec<DownloadRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM downloads WHERE status = ?1 ORDER BY created_at DESC",
            SELECT_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_download).collect())
    }

    /// Apply a partial update. Read-merge-write inside one transaction so
    /// concurrent patches never interleave half-applied.
    pub async fn update_download(&self, id: &str, patch: DownloadPatch) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            "SELECT {} FROM downloads WHERE id = ?1",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.commit().await?;
            anyhow::bail!("download not found: {}", id);
        };
        let current = row_to_download(&row);

        let url = patch.url.unwrap_or(current.url);
        let mime = patch.mime.or(current.mime);
        let filename = patch.filename.unwrap_or(current.filename);
        let save_path = patch.save_path.unwrap_or(current.save_path);
        let total_size = patch.total_size.unwrap_or(current.total_size);
        let downloaded_bytes = patch.downloaded_bytes.unwrap_or(current.downloaded_bytes);
        let resumable = patch.resumable.unwrap_or(current.resumable);
        let status = patch.status.unwrap_or(current.status);
        let threads = patch.threads.unwrap_or(current.threads);
        let priority = patch.priority.unwrap_or(current.priority);
        let completed_at = patch.completed_at.unwrap_or(current.completed_at);
        let error = patch.error.unwrap_or(current.error);

        sqlx::query(
            r#"
            UPDATE downloads SET
                url = ?1, mime = ?2, filename = ?3, save_path = ?4,
                total_size = ?5, downloaded_bytes = ?6, resumable = ?7,
                status = ?8, threads = ?9, priority = ?10,
                completed_at = ?11, error = ?12
            WHERE id = ?13
            "#,
        )
        .bind(&url)
        .bind(&mime)
        .bind(&filename)
        .bind(&save_path)
        .bind(total_size)
        .bind(downloaded_bytes)
        .bind(resumable as i64)
        .bind(status.as_str())
        .bind(threads)
        .bind(priority.as_str())
        .bind(completed_at)
        .bind(&error)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Delete a download row; segments and schedules cascade.
    pub async fn delete_download(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM downloads WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove all completed rows; returns how many were deleted.
    pub async fn clear_completed(&self) -> Result<u64> {
        let r = sqlx::query("DELETE FROM downloads WHERE status = 'completed'")
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }

    /// Normalize rows stranded mid-transfer by a crash: resumable ones become
    /// `paused`, the rest go back to `pending`. Call before any scheduling.
    /// Returns the number of rows touched.
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let r = sqlx::query(
            r#"
            UPDATE downloads
            SET status = CASE WHEN resumable != 0 THEN 'paused' ELSE 'pending' END
            WHERE status IN ('downloading', 'queued', 'verifying')
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }
}
