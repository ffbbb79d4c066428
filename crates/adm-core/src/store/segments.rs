//! Segment row CRUD and bulk progress persistence.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::db::Store;
use super::types::{SegmentPatch, SegmentRow, SegmentStatus};

fn row_to_segment(row: &SqliteRow) -> SegmentRow {
    let status: String = row.get("status");
    SegmentRow {
        download_id: row.get("download_id"),
        seg_index: row.get("seg_index"),
        start_byte: row.get("start_byte"),
        end_byte: row.get("end_byte"),
        downloaded_bytes: row.get("downloaded_bytes"),
        status: SegmentStatus::from_str(&status),
    }
}

impl Store {
    /// Insert a freshly-planned batch of segments in one transaction.
    pub async fn insert_segments(&self, batch: &[SegmentRow]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for s in batch {
            sqlx::query(
                r#"
                INSERT INTO segments (download_id, seg_index, start_byte, end_byte, downloaded_bytes, status)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(&s.download_id)
            .bind(s.seg_index)
            .bind(s.start_byte)
            .bind(s.end_byte)
            .bind(s.downloaded_bytes)
            .bind(s.status.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Segments of a download in index order.
    pub async fn get_segments(&self, download_id: &str) -> Result<Vec<SegmentRow>> {
        let rows = sqlx::query(
            r#"
            SELECT download_id, seg_index, start_byte, end_byte, downloaded_bytes, status
            FROM segments
            WHERE download_id = ?1
            ORDER BY seg_index ASC
            "#,
        )
        .bind(download_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_segment).collect())
    }

    pub async fn update_segment(
        &self,
        download_id: &str,
        seg_index: i64,
        patch: SegmentPatch,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE segments
            SET downloaded_bytes = COALESCE(?1, downloaded_bytes),
                status = COALESCE(?2, status)
            WHERE download_id = ?3 AND seg_index = ?4
            "#,
        )
        .bind(patch.downloaded_bytes)
        .bind(patch.status.map(SegmentStatus::as_str))
        .bind(download_id)
        .bind(seg_index)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Update many segments in one transaction (pause, periodic persist).
    pub async fn bulk_update_segments(
        &self,
        download_id: &str,
        batch: &[(i64, SegmentPatch)],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (seg_index, patch) in batch {
            sqlx::query(
                r#"
                UPDATE segments
                SET downloaded_bytes = COALESCE(?1, downloaded_bytes),
                    status = COALESCE(?2, status)
                WHERE download_id = ?3 AND seg_index = ?4
                "#,
            )
            .bind(patch.downloaded_bytes)
            .bind(patch.status.map(SegmentStatus::as_str))
            .bind(download_id)
            .bind(*seg_index)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Persist segment progress and the aggregate byte counter in one
    /// transaction, keeping `sum(segments) == downloads.downloaded_bytes`
    /// for any reader inside a transaction.
    pub async fn persist_progress(
        &self,
        download_id: &str,
        batch: &[(i64, SegmentPatch)],
        downloaded_bytes: i64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (seg_index, patch) in batch {
            sqlx::query(
                r#"
                UPDATE segments
                SET downloaded_bytes = COALESCE(?1, downloaded_bytes),
                    status = COALESCE(?2, status)
                WHERE download_id = ?3 AND seg_index = ?4
                "#,
            )
            .bind(patch.downloaded_bytes)
            .bind(patch.status.map(SegmentStatus::as_str))
            .bind(download_id)
            .bind(*seg_index)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query("UPDATE downloads SET downloaded_bytes = ?1 WHERE id = ?2")
            .bind(downloaded_bytes)
            .bind(download_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Drop all segment rows of a download (remove, retry re-plan).
    pub async fn delete_segments(&self, download_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM segments WHERE download_id = ?1")
            .bind(download_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
