//! Schedule row CRUD.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::db::Store;
use super::types::{RepeatRule, ScheduleRow};

fn row_to_schedule(row: &SqliteRow) -> ScheduleRow {
    let repeat: String = row.get("repeat");
    ScheduleRow {
        id: row.get("id"),
        download_id: row.get("download_id"),
        scheduled_time: row.get("scheduled_time"),
        repeat: RepeatRule::from_str(&repeat),
        auto_shutdown: row.get::<i64, _>("auto_shutdown") != 0,
        enabled: row.get::<i64, _>("enabled") != 0,
    }
}

impl Store {
    /// Insert a schedule; returns its row id.
    pub async fn insert_schedule(
        &self,
        download_id: &str,
        scheduled_time: i64,
        repeat: RepeatRule,
        auto_shutdown: bool,
    ) -> Result<i64> {
        let r = sqlx::query(
            r#"
            INSERT INTO schedules (download_id, scheduled_time, repeat, auto_shutdown, enabled)
            VALUES (?1, ?2, ?3, ?4, 1)
            "#,
        )
        .bind(download_id)
        .bind(scheduled_time)
        .bind(repeat.as_str())
        .bind(auto_shutdown as i64)
        .execute(&self.pool)
        .await?;
        Ok(r.last_insert_rowid())
    }

    /// All schedules, soonest first.
    pub async fn list_schedules(&self) -> Result<Vec<ScheduleRow>> {
        let rows = sqlx::query(
            r#"
            SELECT id, download_id, scheduled_time, repeat, auto_shutdown, enabled
            FROM schedules
            ORDER BY scheduled_time ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_schedule).collect())
    }

    pub async fn list_enabled_schedules(&self) -> Result<Vec<ScheduleRow>> {
        let rows = sqlx::query(
            r#"
            SELECT id, download_id, scheduled_time, repeat, auto_shutdown, enabled
            FROM schedules
            WHERE enabled = 1
            ORDER BY scheduled_time ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_schedule).collect())
    }

    /// Move a recurring schedule to its next occurrence.
    pub async fn set_schedule_time(&self, id: i64, scheduled_time: i64) -> Result<()> {
        sqlx::query("UPDATE schedules SET scheduled_time = ?1 WHERE id = ?2")
            .bind(scheduled_time)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_schedule_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE schedules SET enabled = ?1 WHERE id = ?2")
            .bind(enabled as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_schedule(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM schedules WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_schedules_for(&self, download_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM schedules WHERE download_id = ?1")
            .bind(download_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
