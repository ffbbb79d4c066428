//! Queue admission: priority ordering, a global concurrency cap, auto-retry.
//!
//! Three FIFO lanes (high/normal/low) feed a dispatcher task that admits
//! downloads to the engine while slots are free. A slot is held from
//! `engine.start` until the session settles. Failed downloads are re-queued
//! with capped exponential backoff when auto-retry is enabled.

use anyhow::Result;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use crate::config::AdmConfig;
use crate::engine::DownloadEngine;
use crate::store::{DownloadId, DownloadPatch, DownloadStatus, Priority};

/// Queue counters for the stats surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Entries waiting for a slot.
    pub pending: usize,
    /// Sessions currently holding a slot.
    pub active: usize,
    /// pending + active.
    pub size: usize,
}

struct QueueState {
    /// One FIFO lane per priority, indexed by `Priority::rank()`.
    lanes: [VecDeque<DownloadId>; 3],
    queued: HashSet<DownloadId>,
    active: HashSet<DownloadId>,
    /// Per-id auto-retry attempts; cleared on success or removal.
    retries: HashMap<DownloadId, u32>,
    max_concurrent: usize,
}

impl QueueState {
    fn pop_next(&mut self) -> Option<DownloadId> {
        for rank in (0..3).rev() {
            if let Some(id) = self.lanes[rank].pop_front() {
                self.queued.remove(&id);
                return Some(id);
            }
        }
        None
    }

    fn drop_entry(&mut self, id: &str) {
        for lane in &mut self.lanes {
            lane.retain(|queued_id| queued_id != id);
        }
        self.queued.remove(id);
    }
}

struct QueueInner {
    engine: DownloadEngine,
    auto_retry: bool,
    max_retries: u32,
    state: Mutex<QueueState>,
    notify: Notify,
}

/// The queue manager. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<QueueInner>,
}

impl QueueManager {
    pub fn new(engine: DownloadEngine, cfg: &AdmConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                engine,
                auto_retry: cfg.auto_retry_failed,
                max_retries: cfg.retry.max_retries,
                state: Mutex::new(QueueState {
                    lanes: Default::default(),
                    queued: HashSet::new(),
                    active: HashSet::new(),
                    retries: HashMap::new(),
                    max_concurrent: cfg.max_concurrent_downloads.max(1),
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Run the admission loop until the task is aborted.
    pub fn spawn_dispatcher(&self) -> tokio::task::JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move { queue.dispatch_loop().await })
    }

    /// Queue a download for admission. Already-active or already-queued ids
    /// are a no-op. Moves the row to `queued` and reorders by priority.
    pub async fn enqueue(&self, id: &str, priority: Option<Priority>) -> Result<()> {
        {
            let state = self.inner.state.lock().unwrap();
            if state.active.contains(id) || state.queued.contains(id) {
                return Ok(());
            }
        }
        let Some(row) = self.inner.engine.get(id).await? else {
            anyhow::bail!("download not found: {}", id);
        };
        let prio = priority.unwrap_or(row.priority);

        let mut patch = DownloadPatch {
            status: Some(DownloadStatus::Queued),
            ..Default::default()
        };
        if prio != row.priority {
            patch.priority = Some(prio);
        }
        self.inner.engine.store().update_download(id, patch).await?;
        self.inner.engine.emit(crate::engine::EngineEvent::StatusChanged {
            id: id.to_string(),
            status: DownloadStatus::Queued,
        });

        {
            let mut state = self.inner.state.lock().unwrap();
            state.lanes[prio.rank() as usize].push_back(id.to_string());
            state.queued.insert(id.to_string());
        }
        self.inner.notify.notify_one();
        Ok(())
    }

    /// Update a pending entry's priority and persist it on the row.
    pub async fn set_priority(&self, id: &str, priority: Priority) -> Result<()> {
        self.inner
            .engine
            .store()
            .update_download(
                id,
                DownloadPatch {
                    priority: Some(priority),
                    ..Default::default()
                },
            )
            .await?;
        let mut state = self.inner.state.lock().unwrap();
        if state.queued.contains(id) {
            state.drop_entry(id);
            state.lanes[priority.rank() as usize].push_back(id.to_string());
            state.queued.insert(id.to_string());
        }
        Ok(())
    }

    /// Change the slot count. Raising it wakes the dispatcher immediately;
    /// lowering drains naturally as sessions settle.
    pub fn set_concurrency(&self, n: usize) {
        self.inner.state.lock().unwrap().max_concurrent = n.max(1);
        self.inner.notify.notify_one();
    }

    /// Pause every queued and active download.
    pub async fn pause_all(&self) -> Result<()> {
        let (queued, active): (Vec<DownloadId>, Vec<DownloadId>) = {
            let mut state = self.inner.state.lock().unwrap();
            let queued: Vec<_> = state.queued.iter().cloned().collect();
            for id in &queued {
                state.drop_entry(id);
            }
            (queued, state.active.iter().cloned().collect())
        };
        for id in queued.iter().chain(active.iter()) {
            self.inner.engine.pause(id).await?;
        }
        Ok(())
    }

    /// Re-enqueue every persisted `paused` download.
    pub async fn resume_all(&self) -> Result<()> {
        let paused = self
            .inner
            .engine
            .store()
            .list_by_status(DownloadStatus::Paused)
            .await?;
        for row in paused {
            self.enqueue(&row.id, None).await?;
        }
        Ok(())
    }

    /// Drop all waiting entries, returning their rows to `pending`.
    pub async fn clear(&self) -> Result<()> {
        let queued: Vec<DownloadId> = {
            let mut state = self.inner.state.lock().unwrap();
            let queued: Vec<_> = state.queued.iter().cloned().collect();
            for id in &queued {
                state.drop_entry(id);
            }
            queued
        };
        for id in queued {
            self.inner
                .engine
                .store()
                .update_download(
                    &id,
                    DownloadPatch {
                        status: Some(DownloadStatus::Pending),
                        ..Default::default()
                    },
                )
                .await?;
        }
        Ok(())
    }

    /// Forget a download's retry budget (call on explicit removal).
    pub fn forget(&self, id: &str) {
        let mut state = self.inner.state.lock().unwrap();
        state.drop_entry(id);
        state.retries.remove(id);
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock().unwrap();
        let pending = state.queued.len();
        let active = state.active.len();
        QueueStats {
            pending,
            active,
            size: pending + active,
        }
    }

    async fn dispatch_loop(&self) {
        loop {
            let next = {
                let mut state = self.inner.state.lock().unwrap();
                if state.active.len() < state.max_concurrent {
                    state.pop_next()
                } else {
                    None
                }
            };

            let Some(id) = next else {
                self.inner.notify.notified().await;
                continue;
            };

            // The row may have been paused or removed while it waited.
            match self.inner.engine.get(&id).await {
                Ok(Some(row)) if row.status == DownloadStatus::Queued => {}
                _ => continue,
            }

            self.inner.state.lock().unwrap().active.insert(id.clone());
            let queue = self.clone();
            tokio::spawn(async move {
                queue.run_slot(id).await;
            });
        }
    }

    /// Hold one slot for the session's whole lifetime, then trigger
    /// auto-retry on failure.
    async fn run_slot(&self, id: DownloadId) {
        let outcome = self.inner.engine.start(&id).await;
        {
            let mut state = self.inner.state.lock().unwrap();
            state.active.remove(&id);
        }
        self.inner.notify.notify_one();

        match outcome {
            Ok(DownloadStatus::Completed) => {
                self.inner.state.lock().unwrap().retries.remove(&id);
            }
            Ok(DownloadStatus::Error) => self.maybe_retry(id).await,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(id = %id, "queue slot failed to start download: {:#}", e);
            }
        }
    }

    async fn maybe_retry(&self, id: DownloadId) {
        if !self.inner.auto_retry {
            return;
        }
        let attempt = {
            let mut state = self.inner.state.lock().unwrap();
            let attempt = state.retries.entry(id.clone()).or_insert(0);
            *attempt += 1;
            *attempt
        };
        if attempt > self.inner.max_retries {
            tracing::info!(id = %id, attempt, "auto-retry budget exhausted");
            return;
        }
        let delay = auto_retry_delay(attempt - 1);
        tracing::info!(id = %id, attempt, delay_ms = delay.as_millis() as u64, "auto-retry scheduled");
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = queue.enqueue(&id, None).await {
                tracing::warn!(id = %id, "auto-retry enqueue failed: {:#}", e);
            }
        });
    }
}

/// `min(5000 · 2^attempt, 60000)` milliseconds.
fn auto_retry_delay(attempt: u32) -> Duration {
    let ms = 5_000u64.saturating_mul(1 << attempt.min(8)).min(60_000);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(ids: &[(&str, Priority)]) -> QueueState {
        let mut state = QueueState {
            lanes: Default::default(),
            queued: HashSet::new(),
            active: HashSet::new(),
            retries: HashMap::new(),
            max_concurrent: 3,
        };
        for (id, prio) in ids {
            state.lanes[prio.rank() as usize].push_back(id.to_string());
            state.queued.insert(id.to_string());
        }
        state
    }

    #[test]
    fn high_priority_pops_first() {
        let mut state = state_with(&[
            ("n1", Priority::Normal),
            ("l1", Priority::Low),
            ("h1", Priority::High),
            ("n2", Priority::Normal),
        ]);
        assert_eq!(state.pop_next().as_deref(), Some("h1"));
        assert_eq!(state.pop_next().as_deref(), Some("n1"));
        assert_eq!(state.pop_next().as_deref(), Some("n2"));
        assert_eq!(state.pop_next().as_deref(), Some("l1"));
        assert_eq!(state.pop_next(), None);
    }

    #[test]
    fn fifo_within_a_lane() {
        let mut state = state_with(&[
            ("a", Priority::Normal),
            ("b", Priority::Normal),
            ("c", Priority::Normal),
        ]);
        assert_eq!(state.pop_next().as_deref(), Some("a"));
        assert_eq!(state.pop_next().as_deref(), Some("b"));
        assert_eq!(state.pop_next().as_deref(), Some("c"));
    }

    #[test]
    fn drop_entry_removes_everywhere() {
        let mut state = state_with(&[("a", Priority::Normal), ("b", Priority::High)]);
        state.drop_entry("b");
        assert!(!state.queued.contains("b"));
        assert_eq!(state.pop_next().as_deref(), Some("a"));
        assert_eq!(state.pop_next(), None);
    }

    #[test]
    fn retry_delay_doubles_and_caps() {
        assert_eq!(auto_retry_delay(0), Duration::from_millis(5_000));
        assert_eq!(auto_retry_delay(1), Duration::from_millis(10_000));
        assert_eq!(auto_retry_delay(2), Duration::from_millis(20_000));
        assert_eq!(auto_retry_delay(3), Duration::from_millis(40_000));
        assert_eq!(auto_retry_delay(4), Duration::from_millis(60_000));
        assert_eq!(auto_retry_delay(10), Duration::from_millis(60_000));
    }
}
