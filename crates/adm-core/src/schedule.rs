//! Durable scheduling of future and recurring downloads.
//!
//! Schedules load at daemon start and arm one timer task each. Firing only
//! ever enqueues; recurring schedules advance their stored trigger time and
//! re-arm. A schedule flagged `auto_shutdown` arms a watcher that polls the
//! download and powers the machine off once it completes.

use anyhow::Result;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::queue::QueueManager;
use crate::store::{unix_timestamp_ms, DownloadStatus, RepeatRule, ScheduleRow, Store};

/// Past-due schedules within this window still fire immediately.
const LATE_GRACE_MS: i64 = 5 * 60 * 1000;
/// Wait after completion before the shutdown command is issued.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);
/// Poll cadence of the auto-shutdown watcher.
const WATCH_INTERVAL: Duration = Duration::from_secs(5);

/// What to do with a loaded schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireDecision {
    /// Fire after `delay`; `advanced_to` is the trigger time actually used
    /// (differs from the stored one when a recurrence was rolled forward).
    Fire { delay_ms: i64, advanced_to: i64 },
    /// Too old and not recurring.
    Skip,
}

/// Delay rules: recent past fires now, stale one-shots are skipped, and
/// recurrences advance by whole intervals until they land in the future.
pub fn decide(now_ms: i64, scheduled_time: i64, repeat: RepeatRule) -> FireDecision {
    if scheduled_time >= now_ms {
        return FireDecision::Fire {
            delay_ms: scheduled_time - now_ms,
            advanced_to: scheduled_time,
        };
    }
    if now_ms - scheduled_time <= LATE_GRACE_MS {
        return FireDecision::Fire {
            delay_ms: 0,
            advanced_to: scheduled_time,
        };
    }
    let Some(interval) = repeat.interval_ms() else {
        return FireDecision::Skip;
    };
    let missed = (now_ms - scheduled_time) / interval + 1;
    let next = scheduled_time + missed * interval;
    FireDecision::Fire {
        delay_ms: next - now_ms,
        advanced_to: next,
    }
}

struct SchedulerInner {
    store: Store,
    queue: QueueManager,
    shutdown_watch: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Scheduler handle. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(store: Store, queue: QueueManager) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                queue,
                shutdown_watch: Mutex::new(None),
            }),
        }
    }

    /// Load enabled schedules and arm a timer for each.
    pub async fn start(&self) -> Result<()> {
        let schedules = self.inner.store.list_enabled_schedules().await?;
        tracing::info!(count = schedules.len(), "arming schedules");
        for sched in schedules {
            self.arm(sched);
        }
        Ok(())
    }

    /// Persist a new schedule and arm it immediately.
    pub async fn add(
        &self,
        download_id: &str,
        scheduled_time: i64,
        repeat: RepeatRule,
        auto_shutdown: bool,
    ) -> Result<i64> {
        let id = self
            .inner
            .store
            .insert_schedule(download_id, scheduled_time, repeat, auto_shutdown)
            .await?;
        self.arm(ScheduleRow {
            id,
            download_id: download_id.to_string(),
            scheduled_time,
            repeat,
            auto_shutdown,
            enabled: true,
        });
        Ok(id)
    }

    fn arm(&self, mut sched: ScheduleRow) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            loop {
                let now = unix_timestamp_ms();
                let decision = decide(now, sched.scheduled_time, sched.repeat);
                let advanced_to = match decision {
                    FireDecision::Skip => {
                        tracing::info!(schedule = sched.id, "stale one-shot schedule skipped");
                        let _ = scheduler
                            .inner
                            .store
                            .set_schedule_enabled(sched.id, false)
                            .await;
                        return;
                    }
                    FireDecision::Fire {
                        delay_ms,
                        advanced_to,
                    } => {
                        if advanced_to != sched.scheduled_time {
                            let _ = scheduler
                                .inner
                                .store
                                .set_schedule_time(sched.id, advanced_to)
                                .await;
                        }
                        tokio::time::sleep(Duration::from_millis(delay_ms.max(0) as u64)).await;
                        advanced_to
                    }
                };

                tracing::info!(schedule = sched.id, download = %sched.download_id, "schedule fired");
                if let Err(e) = scheduler.inner.queue.enqueue(&sched.download_id, None).await {
                    tracing::warn!(schedule = sched.id, "scheduled enqueue failed: {:#}", e);
                }
                if sched.auto_shutdown {
                    scheduler.arm_shutdown(sched.download_id.clone());
                }

                match sched.repeat.interval_ms() {
                    Some(interval) => {
                        sched.scheduled_time = advanced_to + interval;
                        let _ = scheduler
                            .inner
                            .store
                            .set_schedule_time(sched.id, sched.scheduled_time)
                            .await;
                    }
                    None => {
                        let _ = scheduler
                            .inner
                            .store
                            .set_schedule_enabled(sched.id, false)
                            .await;
                        return;
                    }
                }
            }
        });
    }

    /// Poll the download until it completes, then shut the machine down
    /// after a grace period. A failure or cancellation disarms the watcher.
    fn arm_shutdown(&self, download_id: String) {
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(WATCH_INTERVAL).await;
                let row = match scheduler.inner.store.get_download(&download_id).await {
                    Ok(Some(row)) => row,
                    _ => return,
                };
                match row.status {
                    DownloadStatus::Completed => {
                        tracing::info!(download = %download_id, "auto-shutdown armed, waiting grace period");
                        tokio::time::sleep(SHUTDOWN_GRACE).await;
                        issue_shutdown();
                        return;
                    }
                    DownloadStatus::Error | DownloadStatus::Cancelled => return,
                    _ => {}
                }
            }
        });
        let mut watch = self.inner.shutdown_watch.lock().unwrap();
        if let Some(old) = watch.replace(handle) {
            old.abort();
        }
    }

    /// Abort a pending shutdown, both the watcher and the OS countdown.
    pub fn cancel_shutdown(&self) {
        if let Some(handle) = self.inner.shutdown_watch.lock().unwrap().take() {
            handle.abort();
        }
        let _ = std::process::Command::new("shutdown").arg("-c").status();
    }
}

/// Power off with a one-minute countdown, so the cancel command has a window.
fn issue_shutdown() {
    tracing::info!("issuing system shutdown");
    if let Err(e) = std::process::Command::new("shutdown").args(["-h", "+1"]).status() {
        tracing::warn!("shutdown command failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = 60 * 60 * 1000;
    const DAY: i64 = 24 * HOUR;

    #[test]
    fn future_schedule_waits() {
        let now = 1_000_000;
        assert_eq!(
            decide(now, now + HOUR, RepeatRule::None),
            FireDecision::Fire {
                delay_ms: HOUR,
                advanced_to: now + HOUR
            }
        );
    }

    #[test]
    fn recent_past_fires_immediately() {
        let now = 1_000_000_000;
        let two_min_ago = now - 2 * 60 * 1000;
        assert_eq!(
            decide(now, two_min_ago, RepeatRule::None),
            FireDecision::Fire {
                delay_ms: 0,
                advanced_to: two_min_ago
            }
        );
    }

    #[test]
    fn stale_one_shot_skipped() {
        let now = 1_000_000_000;
        assert_eq!(decide(now, now - HOUR, RepeatRule::None), FireDecision::Skip);
    }

    #[test]
    fn stale_daily_advances_into_future() {
        let now = 1_000_000_000_000;
        let three_days_ago = now - 3 * DAY - HOUR;
        let FireDecision::Fire {
            delay_ms,
            advanced_to,
        } = decide(now, three_days_ago, RepeatRule::Daily)
        else {
            panic!("expected fire");
        };
        assert!(advanced_to > now);
        assert!(advanced_to - now <= DAY);
        assert_eq!(advanced_to - now, delay_ms);
        // whole intervals from the original trigger
        assert_eq!((advanced_to - three_days_ago) % DAY, 0);
    }

    #[test]
    fn stale_weekly_advances_by_weeks() {
        let now = 1_000_000_000_000;
        let ten_days_ago = now - 10 * DAY;
        let FireDecision::Fire { advanced_to, .. } = decide(now, ten_days_ago, RepeatRule::Weekly)
        else {
            panic!("expected fire");
        };
        assert!(advanced_to > now);
        assert_eq!((advanced_to - ten_days_ago) % (7 * DAY), 0);
    }
}
