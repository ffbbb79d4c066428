//! Session supervision: `start`, the multi-segment path, and verification.

use anyhow::Result;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::arena::{self, ArenaBuilder, ArenaWriter};
use crate::errors::{classify_io, ErrorKind};
use crate::fetcher::{FetchContext, FetchEvent, SegmentFetcher, SegmentSpan};
use crate::pacer::TokenBucket;
use crate::store::{
    unix_timestamp_ms, DownloadPatch, DownloadRow, DownloadStatus, SegmentPatch, SegmentRow,
    SegmentStatus,
};

use super::plan::plan_segments;
use super::{ActiveDownload, DownloadEngine, EngineEvent};

/// How a session ended; `start` persists the matching row state.
pub(super) enum SessionOutcome {
    Completed { downloaded: u64 },
    Paused,
    Cancelled,
    Failed { kind: ErrorKind, message: String },
}

impl DownloadEngine {
    /// Run the download to a terminal or suspended state and return the
    /// status the row ends in. The id's lock is held for the whole session;
    /// a second `start` while one is running is a no-op.
    pub async fn start(&self, id: &str) -> Result<DownloadStatus> {
        let lock = self.lock_for(id);
        let Ok(_guard) = lock.try_lock() else {
            return Ok(DownloadStatus::Downloading);
        };

        let row = self
            .inner
            .store
            .get_download(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("{}: {}", ErrorKind::NotFound, id))?;
        if row.status == DownloadStatus::Completed {
            return Ok(DownloadStatus::Completed);
        }

        self.inner
            .store
            .update_download(
                id,
                DownloadPatch {
                    status: Some(DownloadStatus::Downloading),
                    error: Some(None),
                    ..Default::default()
                },
            )
            .await?;
        self.emit(EngineEvent::StatusChanged {
            id: id.to_string(),
            status: DownloadStatus::Downloading,
        });

        let multi = row.resumable && row.total_size > 0;
        let outcome = if multi {
            self.run_multi(&row).await
        } else {
            self.run_single(&row).await
        };
        let outcome = outcome.unwrap_or_else(|e| SessionOutcome::Failed {
            kind: ErrorKind::Internal,
            message: format!("{:#}", e),
        });

        self.unregister_active(id);
        self.settle(&row, outcome).await
    }

    /// Persist the outcome and emit the matching event.
    async fn settle(&self, row: &DownloadRow, outcome: SessionOutcome) -> Result<DownloadStatus> {
        let id = &row.id;
        let (status, patch, event) = match outcome {
            SessionOutcome::Completed { downloaded } => {
                tracing::info!(id = %id, path = %row.save_path, "download completed");
                (
                    DownloadStatus::Completed,
                    DownloadPatch {
                        status: Some(DownloadStatus::Completed),
                        downloaded_bytes: Some(downloaded as i64),
                        completed_at: Some(Some(unix_timestamp_ms())),
                        error: Some(None),
                        ..Default::default()
                    },
                    EngineEvent::Completed { id: id.clone() },
                )
            }
            SessionOutcome::Paused => (
                DownloadStatus::Paused,
                DownloadPatch {
                    status: Some(DownloadStatus::Paused),
                    ..Default::default()
                },
                EngineEvent::Paused { id: id.clone() },
            ),
            SessionOutcome::Cancelled => (
                DownloadStatus::Cancelled,
                DownloadPatch {
                    status: Some(DownloadStatus::Cancelled),
                    downloaded_bytes: Some(0),
                    error: Some(None),
                    ..Default::default()
                },
                EngineEvent::Cancelled { id: id.clone() },
            ),
            SessionOutcome::Failed { kind, message } => {
                tracing::warn!(id = %id, %kind, "download failed: {}", message);
                (
                    DownloadStatus::Error,
                    DownloadPatch {
                        status: Some(DownloadStatus::Error),
                        error: Some(Some(message.clone())),
                        ..Default::default()
                    },
                    EngineEvent::Failed {
                        id: id.clone(),
                        error: message,
                    },
                )
            }
        };
        self.inner.store.update_download(id, patch).await?;
        self.emit(event);
        Ok(status)
    }

    /// Concurrent range download across planned segments.
    async fn run_multi(&self, row: &DownloadRow) -> Result<SessionOutcome> {
        let id = &row.id;
        let total = row.total_size as u64;
        let threads = row.threads.max(1) as usize;
        let path = Path::new(&row.save_path).to_path_buf();

        // Load the persisted plan or make one.
        let mut seg_rows = self.inner.store.get_segments(id).await?;
        if seg_rows.is_empty() {
            seg_rows = plan_segments(total, threads)
                .into_iter()
                .map(|s| SegmentRow {
                    download_id: id.clone(),
                    seg_index: s.index as i64,
                    start_byte: s.start as i64,
                    end_byte: s.end as i64,
                    downloaded_bytes: 0,
                    status: SegmentStatus::Pending,
                })
                .collect();
            self.inner.store.insert_segments(&seg_rows).await?;
        }

        let has_progress = seg_rows.iter().any(|s| s.downloaded_bytes > 0);
        if has_progress && !path.exists() {
            // The partial file vanished; restart the plan from zero.
            tracing::warn!(id = %id, "partial file missing, restarting segments");
            let reset: Vec<(i64, SegmentPatch)> = seg_rows
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
            for s in &mut seg_rows {
                s.downloaded_bytes = 0;
                s.status = SegmentStatus::Pending;
            }
        }

        let writer = if seg_rows.iter().any(|s| s.downloaded_bytes > 0) && path.exists() {
            match ArenaWriter::open_resume(&path) {
                Ok(w) => w,
                Err(e) => {
                    return Ok(SessionOutcome::Failed {
                        kind: classify_io(&e),
                        message: format!("open {}: {}", path.display(), e),
                    })
                }
            }
        } else {
            match ArenaBuilder::create(&path).and_then(|b| b.preallocate(total)) {
                Ok(b) => b.build(),
                Err(e) => {
                    return Ok(SessionOutcome::Failed {
                        kind: classify_io(&e),
                        message: format!("allocate {}: {}", path.display(), e),
                    })
                }
            }
        };

        let active = ActiveDownload::new(total, seg_rows.len());
        for s in &seg_rows {
            active.counters[s.seg_index as usize].store(s.downloaded_bytes as u64, Ordering::Relaxed);
        }
        self.register_active(id, Arc::clone(&active));

        let incomplete: Vec<SegmentSpan> = seg_rows
            .iter()
            .filter(|s| !s.is_complete())
            .map(|s| SegmentSpan {
                index: s.seg_index as usize,
                start: s.start_byte as u64,
                end: s.end_byte as u64,
            })
            .collect();

        if incomplete.is_empty() {
            drop(writer);
            return self.verify_and_complete(row, &path, total, &active).await;
        }

        let settings = &self.inner.settings;
        let per_rate = if settings.max_bytes_per_sec == 0 {
            0
        } else {
            let n = threads.max(1) as u64;
            (settings.max_bytes_per_sec + n - 1) / n
        };

        let ctx = Arc::new(FetchContext {
            url: row.url.clone(),
            referrer: row.referrer.clone(),
            user_agent: settings.user_agent.clone(),
            writer: writer.clone(),
            counters: Arc::clone(&active.counters),
            stop: Arc::clone(&active.stop),
            cancelled: Arc::clone(&active.cancelled),
            retry: settings.retry,
            stall_timeout: settings.stall_timeout,
            segment_count: seg_rows.len(),
        });

        let (tx, mut rx) = tokio::sync::mpsc::channel::<FetchEvent>(64);
        let mut handles = Vec::with_capacity(incomplete.len());
        for span in &incomplete {
            let fetcher = SegmentFetcher::new(
                Arc::clone(&ctx),
                *span,
                Arc::new(TokenBucket::new(per_rate)),
                tx.clone(),
            );
            handles.push(tokio::task::spawn_blocking(move || fetcher.run()));
        }
        drop(tx);

        let mut remaining = incomplete.len();
        let mut first_error: Option<(ErrorKind, String)> = None;
        let mut errored: HashSet<usize> = HashSet::new();
        while remaining > 0 {
            let Some(event) = rx.recv().await else { break };
            match event {
                FetchEvent::Progress { .. } => {}
                FetchEvent::Complete { index } => {
                    remaining -= 1;
                    let len = seg_rows[index].len();
                    self.inner
                        .store
                        .persist_progress(
                            id,
                            &[(
                                index as i64,
                                SegmentPatch {
                                    downloaded_bytes: Some(len),
                                    status: Some(SegmentStatus::Completed),
                                },
                            )],
                            active.downloaded() as i64,
                        )
                        .await?;
                }
                FetchEvent::Paused { .. } => {
                    remaining -= 1;
                }
                FetchEvent::Error { index, kind, message } => {
                    remaining -= 1;
                    if kind != ErrorKind::Cancelled {
                        errored.insert(index);
                        if first_error.is_none() {
                            first_error = Some((kind, format!("segment {}: {}", index, message)));
                            // One exhausted segment fails the download; stop the rest.
                            active.stop.store(true, Ordering::Relaxed);
                        }
                    }
                }
            }
        }
        for h in handles {
            let _ = h.await;
        }

        if active.cancelled.load(Ordering::Relaxed) {
            drop(ctx);
            drop(writer);
            let _ = std::fs::remove_file(&path);
            let reset: Vec<(i64, SegmentPatch)> = seg_rows
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
            return Ok(SessionOutcome::Cancelled);
        }

        // Bulk-persist whatever the counters hold; the per-transaction sum
        // invariant between segments and the download row comes from here.
        let batch: Vec<(i64, SegmentPatch)> = seg_rows
            .iter()
            .map(|s| {
                let idx = s.seg_index as usize;
                let done = active.counters[idx].load(Ordering::Relaxed) as i64;
                let status = if done >= s.len() {
                    SegmentStatus::Completed
                } else if errored.contains(&idx) {
                    SegmentStatus::Error
                } else {
                    SegmentStatus::Paused
                };
                (
                    s.seg_index,
                    SegmentPatch {
                        downloaded_bytes: Some(done),
                        status: Some(status),
                    },
                )
            })
            .collect();
        self.inner
            .store
            .persist_progress(id, &batch, active.downloaded() as i64)
            .await?;

        if let Some((kind, message)) = first_error {
            drop(ctx);
            drop(writer);
            return Ok(SessionOutcome::Failed {
                kind,
                message,
            });
        }
        if active.stop.load(Ordering::Relaxed) {
            drop(ctx);
            drop(writer);
            return Ok(SessionOutcome::Paused);
        }

        drop(ctx);
        if let Err(e) = writer.sync() {
            return Ok(SessionOutcome::Failed {
                kind: classify_io(&e),
                message: format!("sync {}: {}", path.display(), e),
            });
        }
        drop(writer);
        self.verify_and_complete(row, &path, total, &active).await
    }

    /// Size check, then the optional whole-file hash compare under
    /// `verifying`. Only after both pass is the row marked completed.
    pub(super) async fn verify_and_complete(
        &self,
        row: &DownloadRow,
        path: &Path,
        expected_size: u64,
        active: &ActiveDownload,
    ) -> Result<SessionOutcome> {
        if expected_size > 0 && !arena::verify_size(path, expected_size) {
            let actual = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            return Ok(SessionOutcome::Failed {
                kind: ErrorKind::SizeMismatch,
                message: format!(
                    "size mismatch: expected {} bytes, file has {}",
                    expected_size, actual
                ),
            });
        }

        if let (Some(expected), Some(algo)) = (&row.checksum, row.checksum_type) {
            self.inner
                .store
                .update_download(
                    &row.id,
                    DownloadPatch {
                        status: Some(DownloadStatus::Verifying),
                        ..Default::default()
                    },
                )
                .await?;
            self.emit(EngineEvent::StatusChanged {
                id: row.id.clone(),
                status: DownloadStatus::Verifying,
            });
            active.verifying.store(true, Ordering::Relaxed);

            let hash_path = path.to_path_buf();
            let expected_hash = expected.clone();
            let matches = tokio::task::spawn_blocking(move || {
                crate::checksum::verify_path(&hash_path, algo, &expected_hash)
            })
            .await?;
            match matches {
                Ok(true) => {}
                Ok(false) => {
                    // The file stays on disk for inspection.
                    return Ok(SessionOutcome::Failed {
                        kind: ErrorKind::ChecksumMismatch,
                        message: format!(
                            "Checksum mismatch: {} digest does not match expected value",
                            algo.as_str()
                        ),
                    });
                }
                Err(e) => {
                    return Ok(SessionOutcome::Failed {
                        kind: ErrorKind::FsIo,
                        message: format!("hash {}: {:#}", path.display(), e),
                    })
                }
            }
        }

        let downloaded = if expected_size > 0 {
            expected_size
        } else {
            active.downloaded()
        };
        Ok(SessionOutcome::Completed { downloaded })
    }
}
