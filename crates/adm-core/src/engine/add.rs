//! The `add` command: probe, name, preflight, persist.

use anyhow::{Context, Result};

use crate::arena;
use crate::checksum::ChecksumType;
use crate::errors::ErrorKind;
use crate::naming;
use crate::probe::{self, ProbeRequest};
use crate::store::{
    new_download_id, unix_timestamp_ms, DownloadRow, DownloadStatus, Priority,
};

use super::{DownloadEngine, EngineEvent};

/// What a caller must supply to register a download.
#[derive(Debug, Clone, Default)]
pub struct AddRequest {
    pub url: String,
    /// Explicit filename; overrides Content-Disposition and the URL tail.
    pub filename: Option<String>,
    pub referrer: Option<String>,
    pub checksum: Option<String>,
    pub checksum_type: Option<ChecksumType>,
    pub priority: Option<Priority>,
}

impl DownloadEngine {
    /// Probe the URL, resolve a collision-free filename, preflight disk
    /// space, and persist a `pending` row. Emits `Added`.
    pub async fn add(&self, req: AddRequest) -> Result<DownloadRow> {
        let parsed = url::Url::parse(&req.url).with_context(|| format!("invalid URL: {}", req.url))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            anyhow::bail!("unsupported URL scheme: {}", parsed.scheme());
        }

        let id = new_download_id();
        let probe_url = req.url.clone();
        let referrer = req.referrer.clone();
        let user_agent = self.inner.settings.user_agent.clone();
        let probed = tokio::task::spawn_blocking(move || {
            probe::probe(
                &probe_url,
                &ProbeRequest {
                    user_agent: &user_agent,
                    referrer: referrer.as_deref(),
                },
            )
        })
        .await
        .context("probe task panicked")?;

        let now = unix_timestamp_ms();
        let filename = naming::resolve_filename(
            req.filename.as_deref(),
            probed.filename.as_deref(),
            &probed.final_url,
            now as u64,
        );

        let dir = self.inner.settings.download_dir.clone();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create download dir {}", dir.display()))?;

        // Avoid clobbering another row's destination in the same directory.
        let sibling_names: Vec<String> = self
            .inner
            .store
            .list_downloads()
            .await?
            .into_iter()
            .filter(|d| {
                std::path::Path::new(&d.save_path).parent() == Some(dir.as_path())
            })
            .map(|d| d.filename)
            .collect();
        let filename = naming::unique_filename_among(&filename, &sibling_names);
        let save_path = dir.join(&filename);

        if probed.total_size > 0 && !arena::check_free_space(&dir, probed.total_size) {
            anyhow::bail!(
                "{}: need {} bytes in {}",
                ErrorKind::DiskFull,
                probed.total_size,
                dir.display()
            );
        }

        let resumable = probed.supports_range && probed.total_size > 0;
        let threads = if resumable {
            self.inner.settings.threads_per_download as i64
        } else {
            1
        };

        let row = DownloadRow {
            id: id.clone(),
            url: probed.final_url,
            referrer: req.referrer,
            mime: probed.mime,
            filename,
            save_path: save_path.to_string_lossy().into_owned(),
            total_size: probed.total_size as i64,
            downloaded_bytes: 0,
            resumable,
            status: DownloadStatus::Pending,
            threads,
            priority: req.priority.unwrap_or(Priority::Normal),
            created_at: now,
            completed_at: None,
            checksum: req.checksum,
            checksum_type: req.checksum_type,
            error: None,
        };
        self.inner.store.insert_download(&row).await?;
        tracing::info!(id = %row.id, url = %row.url, resumable, threads, "download added");
        self.emit(EngineEvent::Added { id });
        Ok(row)
    }
}
