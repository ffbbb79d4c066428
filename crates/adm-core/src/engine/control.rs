//! Pause, resume, cancel, retry, remove, and read commands.

use anyhow::Result;
use std::sync::atomic::Ordering;

use crate::errors::ErrorKind;
use crate::store::{DownloadPatch, DownloadRow, DownloadStatus, SegmentPatch, SegmentStatus};

use super::{DownloadEngine, EngineEvent};

impl DownloadEngine {
    /// Stop an active session with progress kept, or park a waiting row.
    /// For an active download the session task does the persistence and
    /// emits `Paused` once its fetchers have wound down.
    pub async fn pause(&self, id: &str) -> Result<()> {
        if let Some(active) = self.get_active(id) {
            tracing::info!(id, "pause requested");
            active.stop.store(true, Ordering::Relaxed);
            return Ok(());
        }

        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        let row = self.require(id).await?;
        match row.status {
            DownloadStatus::Pending | DownloadStatus::Queued => {
                self.inner
                    .store
                    .update_download(
                        id,
                        DownloadPatch {
                            status: Some(DownloadStatus::Paused),
                            ..Default::default()
                        },
                    )
                    .await?;
                self.emit(EngineEvent::Paused { id: id.to_string() });
            }
            // Already paused or terminal: nothing to do.
            _ => {}
        }
        Ok(())
    }

    /// Restart a paused, failed, or cancelled download. Multi-segment rows
    /// pick up from their persisted segment progress.
    pub async fn resume(&self, id: &str) -> Result<DownloadStatus> {
        if self.is_active(id) {
            return Ok(DownloadStatus::Downloading);
        }
        let row = self.require(id).await?;
        match row.status {
            DownloadStatus::Paused
            | DownloadStatus::Error
            | DownloadStatus::Cancelled
            | DownloadStatus::Pending
            | DownloadStatus::Queued => self.start(id).await,
            s => anyhow::bail!("cannot resume download in state {}", s.as_str()),
        }
    }

    /// User-initiated stop: tears the session down and deletes the partial
    /// file. The row stays, in `cancelled`, so the download can be restarted.
    pub async fn cancel(&self, id: &str) -> Result<()> {
        if let Some(active) = self.get_active(id) {
            tracing::info!(id, "cancel requested");
            active.cancelled.store(true, Ordering::Relaxed);
            active.stop.store(true, Ordering::Relaxed);
            return Ok(());
        }

        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        let row = self.require(id).await?;
        if row.status == DownloadStatus::Completed {
            return Ok(());
        }
        let _ = std::fs::remove_file(&row.save_path);
        let segments = self.inner.store.get_segments(id).await?;
        if !segments.is_empty() {
            let reset: Vec<(i64, SegmentPatch)> = segments
                .iter()
                .map(|s| {
                    (
                        s.seg_index,
                        SegmentPatch {
                            downloaded_bytes: Some(0),
                            status: Some(SegmentStatus::Pending),
                        },
                    )
                })
                .collect();
            self.inner.store.persist_progress(id, &reset, 0).await?;
        }
        self.inner
            .store
            .update_download(
                id,
                DownloadPatch {
                    status: Some(DownloadStatus::Cancelled),
                    downloaded_bytes: Some(0),
                    error: Some(None),
                    ..Default::default()
                },
            )
            .await?;
        self.emit(EngineEvent::Cancelled { id: id.to_string() });
        Ok(())
    }

    /// Zero progress and drop the segment plan so the next start re-plans.
    pub async fn reset(&self, id: &str) -> Result<()> {
        if self.is_active(id) {
            anyhow::bail!("download {} is still active", id);
        }
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        self.require(id).await?;
        self.inner.store.delete_segments(id).await?;
        self.inner
            .store
            .update_download(
                id,
                DownloadPatch {
                    downloaded_bytes: Some(0),
                    error: Some(None),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Discard all progress and start over: zeroed counters, fresh segment
    /// plan, cleared error.
    pub async fn retry(&self, id: &str) -> Result<DownloadStatus> {
        self.reset(id).await?;
        self.start(id).await
    }

    /// Drop the download and its segment and schedule rows. A completed
    /// file stays on disk; a partial one is removed.
    pub async fn remove(&self, id: &str) -> Result<()> {
        if let Some(active) = self.get_active(id) {
            active.cancelled.store(true, Ordering::Relaxed);
            active.stop.store(true, Ordering::Relaxed);
        }
        let lock = self.lock_for(id);
        // Waits for a running session to settle before the row goes away.
        let _guard = lock.lock().await;
        let row = self.require(id).await?;
        if row.status != DownloadStatus::Completed {
            let _ = std::fs::remove_file(&row.save_path);
        }
        self.inner.store.delete_download(id).await?;
        tracing::info!(id, "download removed");
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<DownloadRow>> {
        self.inner.store.list_downloads().await
    }

    pub async fn get(&self, id: &str) -> Result<Option<DownloadRow>> {
        self.inner.store.get_download(id).await
    }

    pub async fn clear_completed(&self) -> Result<u64> {
        self.inner.store.clear_completed().await
    }

    async fn require(&self, id: &str) -> Result<DownloadRow> {
        self.inner
            .store
            .get_download(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("{}: {}", ErrorKind::NotFound, id))
    }
}
