//! Activity-gated progress broadcasting.
//!
//! No timer runs while nothing is downloading. Engine activity events start
//! a tick loop that pulls snapshots (which also advances the speed EMAs) and
//! broadcasts the batch; the loop stops itself when the active set drains.
//! The cadence adapts to whether a visible subscriber is watching.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::engine::{DownloadEngine, EngineEvent, ProgressSnapshot};

const VISIBLE_PERIOD: Duration = Duration::from_millis(100);
const BACKGROUND_PERIOD: Duration = Duration::from_millis(500);

struct PumpInner {
    engine: DownloadEngine,
    tx: broadcast::Sender<Vec<ProgressSnapshot>>,
    running: AtomicBool,
    visible: AtomicBool,
}

/// The progress pump. Cheap to clone; all clones share the timer state.
#[derive(Clone)]
pub struct ProgressPump {
    inner: Arc<PumpInner>,
}

impl ProgressPump {
    pub fn new(engine: DownloadEngine) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(PumpInner {
                engine,
                tx,
                running: AtomicBool::new(false),
                visible: AtomicBool::new(true),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<ProgressSnapshot>> {
        self.inner.tx.subscribe()
    }

    /// Slow the cadence when the subscriber is backgrounded.
    pub fn set_visible(&self, visible: bool) {
        self.inner.visible.store(visible, Ordering::Relaxed);
    }

    /// Watch engine lifecycle events and keep the tick loop running while
    /// any download is active.
    pub fn spawn(&self) -> tokio::task::JoinHandle<()> {
        let pump = self.clone();
        let mut events = self.inner.engine.subscribe();
        tokio::spawn(async move {
            pump.ensure_running();
            loop {
                match events.recv().await {
                    Ok(EngineEvent::Added { .. })
                    | Ok(EngineEvent::StatusChanged { .. }) => pump.ensure_running(),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => pump.ensure_running(),
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        })
    }

    fn period(&self) -> Duration {
        if self.inner.visible.load(Ordering::Relaxed) {
            VISIBLE_PERIOD
        } else {
            BACKGROUND_PERIOD
        }
    }

    /// Start the tick loop unless one is already running.
    fn ensure_running(&self) {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let pump = self.clone();
        tokio::spawn(async move {
            loop {
                let snapshots = pump.inner.engine.snapshots();
                if snapshots.is_empty() {
                    pump.inner.running.store(false, Ordering::Release);
                    // A download may have gone active in the gap; reclaim the
                    // timer rather than waiting for the next event.
                    if pump.inner.engine.active_count() > 0 {
                        pump.ensure_running();
                    }
                    return;
                }
                // Without subscribers the tick is a no-op.
                if pump.inner.tx.receiver_count() > 0 {
                    let _ = pump.inner.tx.send(snapshots);
                }
                tokio::time::sleep(pump.period()).await;
            }
        });
    }
}
