//! Connection handling and migrations.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;

/// Handle to the SQLite-backed download database. Cheap to clone.
///
/// The default location is `$XDG_STATE_HOME/adm/downloads.db`.
#[derive(Clone)]
pub struct Store {
    pub(crate) pool: Pool<Sqlite>,
}

impl Store {
    /// Open (or create) the default database and run migrations.
    pub async fn open_default() -> Result<Self> {
        let state_dir = crate::config::state_dir()?;
        Self::open_at(state_dir.join("downloads.db")).await
    }

    /// Open (or create) the database at a specific path, creating parent
    /// directories. Intended for tests so the DB can live in a temp dir.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Options rather than a URI string: foreign_keys must hold on every
        // pooled connection for segment/schedule cascade deletes.
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        let store = Store { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS downloads (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                referrer TEXT,
                mime TEXT,
                filename TEXT NOT NULL,
                save_path TEXT NOT NULL,
                total_size INTEGER NOT NULL DEFAULT 0,
                downloaded_bytes INTEGER NOT NULL DEFAULT 0,
                resumable INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                threads INTEGER NOT NULL DEFAULT 1,
                priority TEXT NOT NULL DEFAULT 'normal',
                created_at INTEGER NOT NULL,
                completed_at INTEGER,
                checksum TEXT,
                checksum_type TEXT,
                error TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS segments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                download_id TEXT NOT NULL REFERENCES downloads(id) ON DELETE CASCADE,
                seg_index INTEGER NOT NULL,
                start_byte INTEGER NOT NULL,
                end_byte INTEGER NOT NULL,
                downloaded_bytes INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'pending',
                UNIQUE (download_id, seg_index)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schedules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                download_id TEXT NOT NULL REFERENCES downloads(id) ON DELETE CASCADE,
                scheduled_time INTEGER NOT NULL,
                repeat TEXT NOT NULL DEFAULT 'none',
                auto_shutdown INTEGER NOT NULL DEFAULT 0,
                enabled INTEGER NOT NULL DEFAULT 1
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        for idx in [
            "CREATE INDEX IF NOT EXISTS idx_downloads_status ON downloads(status)",
            "CREATE INDEX IF NOT EXISTS idx_downloads_created_at ON downloads(created_at)",
            "CREATE INDEX IF NOT EXISTS idx_segments_download_id ON segments(download_id)",
            "CREATE INDEX IF NOT EXISTS idx_schedules_scheduled_time ON schedules(scheduled_time)",
        ] {
            sqlx::query(idx).execute(&self.pool).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
/// Open an in-memory database for tests (no disk I/O).
pub(crate) async fn open_memory() -> Result<Store> {
    let options = SqliteConnectOptions::new()
        .filename(":memory:")
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    let store = Store { pool };
    store.migrate().await?;
    Ok(store)
}
