//! Download engine: command surface, session supervision, progress state.
//!
//! The engine owns the in-memory map of active downloads. Commands are
//! serialized per download id with an async mutex; `start` holds its id's
//! lock for the whole session, while pause/cancel communicate with a running
//! session through atomic flags (never by mutating session state directly).
//! Fetcher tasks report typed events to the session supervisor; the engine
//! broadcasts lifecycle events to subscribers.

mod add;
mod control;
mod plan;
mod session;
mod single;
mod speed;

pub use add::AddRequest;
pub use plan::plan_segments;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::AdmConfig;
use crate::retry::RetryConfig;
use crate::store::{DownloadId, DownloadStatus, Store};

/// Lifecycle events broadcast to subscribers (queue, pump, UI bridge).
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Added { id: DownloadId },
    StatusChanged { id: DownloadId, status: DownloadStatus },
    Completed { id: DownloadId },
    Paused { id: DownloadId },
    Cancelled { id: DownloadId },
    Failed { id: DownloadId, error: String },
}

/// Live progress view of one download, produced on progress-pump ticks.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub id: DownloadId,
    pub status: DownloadStatus,
    pub downloaded_bytes: u64,
    pub total_size: u64,
    /// Smoothed bytes/sec; 0.0 until the first two samples.
    pub speed_bps: f64,
    /// Estimated seconds remaining; 0.0 when unknown or done.
    pub eta_secs: f64,
}

/// Engine view of the settings snapshot.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub download_dir: PathBuf,
    pub threads_per_download: usize,
    pub max_bytes_per_sec: u64,
    pub stall_timeout: Duration,
    pub user_agent: String,
    pub retry: RetryConfig,
}

impl From<&AdmConfig> for EngineSettings {
    fn from(cfg: &AdmConfig) -> Self {
        Self {
            download_dir: cfg.download_dir.clone(),
            threads_per_download: cfg.effective_threads(),
            max_bytes_per_sec: cfg.max_bytes_per_sec,
            stall_timeout: Duration::from_secs(cfg.stall_timeout_secs.max(1)),
            user_agent: cfg.user_agent.clone(),
            retry: RetryConfig::from(&cfg.retry),
        }
    }
}

/// Runtime context of a download that is currently transferring or verifying.
pub(crate) struct ActiveDownload {
    /// Atomic so the single-connection path can publish a length discovered
    /// mid-flight to snapshot readers.
    pub(crate) total_size: AtomicU64,
    /// Per-segment downloaded bytes (single-connection sessions use slot 0).
    pub(crate) counters: Arc<Vec<AtomicU64>>,
    /// Set by pause or cancel; every fetcher aborts when it flips.
    pub(crate) stop: Arc<AtomicBool>,
    /// Set only by cancel, so teardown can tell the two apart.
    pub(crate) cancelled: Arc<AtomicBool>,
    /// True while the post-transfer hash check runs.
    pub(crate) verifying: AtomicBool,
    pub(crate) ema: Mutex<speed::SpeedEma>,
}

impl ActiveDownload {
    fn new(total_size: u64, segment_count: usize) -> Arc<Self> {
        Arc::new(Self {
            total_size: AtomicU64::new(total_size),
            counters: Arc::new((0..segment_count.max(1)).map(|_| AtomicU64::new(0)).collect()),
            stop: Arc::new(AtomicBool::new(false)),
            cancelled: Arc::new(AtomicBool::new(false)),
            verifying: AtomicBool::new(false),
            ema: Mutex::new(speed::SpeedEma::new()),
        })
    }

    pub(crate) fn downloaded(&self) -> u64 {
        self.counters.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    pub(crate) fn set_total(&self, total: u64) {
        self.total_size.store(total, Ordering::Relaxed);
    }
}

pub(crate) struct EngineInner {
    pub(crate) store: Store,
    pub(crate) settings: EngineSettings,
    pub(crate) events: broadcast::Sender<EngineEvent>,
    pub(crate) active: Mutex<HashMap<DownloadId, Arc<ActiveDownload>>>,
    /// Per-id command serialization; `start` holds its entry for the session.
    locks: Mutex<HashMap<DownloadId, Arc<tokio::sync::Mutex<()>>>>,
}

/// The download engine. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct DownloadEngine {
    pub(crate) inner: Arc<EngineInner>,
}

impl DownloadEngine {
    pub fn new(store: Store, settings: EngineSettings) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(EngineInner {
                store,
                settings,
                events,
                active: Mutex::new(HashMap::new()),
                locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    /// Ids currently transferring or verifying.
    pub fn active_ids(&self) -> Vec<DownloadId> {
        self.inner.active.lock().unwrap().keys().cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        self.inner.active.lock().unwrap().len()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.inner.active.lock().unwrap().contains_key(id)
    }

    /// Progress snapshots for every active download, advancing each speed EMA.
    /// Samples closer than ~50 ms reuse the previous speed to avoid division
    /// artifacts, so callers may tick at any cadence.
    pub fn snapshots(&self) -> Vec<ProgressSnapshot> {
        let now = std::time::Instant::now();
        let active = self.inner.active.lock().unwrap();
        active
            .iter()
            .map(|(id, dl)| {
                let downloaded = dl.downloaded();
                let total = dl.total_size.load(Ordering::Relaxed);
                let speed = dl.ema.lock().unwrap().sample(now, downloaded);
                let remaining = total.saturating_sub(downloaded);
                let eta = if speed > 0.0 && total > 0 {
                    remaining as f64 / speed
                } else {
                    0.0
                };
                ProgressSnapshot {
                    id: id.clone(),
                    status: if dl.verifying.load(Ordering::Relaxed) {
                        DownloadStatus::Verifying
                    } else {
                        DownloadStatus::Downloading
                    },
                    downloaded_bytes: downloaded,
                    total_size: total,
                    speed_bps: speed,
                    eta_secs: eta,
                }
            })
            .collect()
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        let _ = self.inner.events.send(event);
    }

    pub(crate) fn lock_for(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.inner.locks.lock().unwrap();
        Arc::clone(
            locks
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    pub(crate) fn register_active(&self, id: &str, dl: Arc<ActiveDownload>) {
        self.inner.active.lock().unwrap().insert(id.to_string(), dl);
    }

    pub(crate) fn unregister_active(&self, id: &str) {
        self.inner.active.lock().unwrap().remove(id);
    }

    pub(crate) fn get_active(&self, id: &str) -> Option<Arc<ActiveDownload>> {
        self.inner.active.lock().unwrap().get(id).cloned()
    }
}
