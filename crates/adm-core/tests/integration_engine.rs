//! Integration tests: a local range-capable HTTP server driving the engine
//! through multi-segment, fallback, throttled, paused, and verified runs.

mod common;

use std::path::Path;
use std::time::{Duration, Instant};

use adm_core::checksum::ChecksumType;
use adm_core::config::AdmConfig;
use adm_core::engine::{AddRequest, DownloadEngine, EngineSettings};
use adm_core::queue::QueueManager;
use adm_core::store::{DownloadStatus, SegmentStatus, Store};

use common::range_server::{self, RangeServerOptions};

struct Harness {
    _state: tempfile::TempDir,
    downloads: tempfile::TempDir,
    engine: DownloadEngine,
    cfg: AdmConfig,
}

async fn harness(mut cfg: AdmConfig) -> Harness {
    let state = tempfile::tempdir().unwrap();
    let downloads = tempfile::tempdir().unwrap();
    cfg.download_dir = downloads.path().to_path_buf();
    // keep test retries fast and deterministic
    cfg.retry.initial_delay_ms = 50;
    cfg.retry.max_delay_ms = 200;
    cfg.retry.jitter = false;
    let store = Store::open_at(state.path().join("downloads.db")).await.unwrap();
    let engine = DownloadEngine::new(store, EngineSettings::from(&cfg));
    Harness {
        _state: state,
        downloads,
        engine,
        cfg,
    }
}

fn body_of(len: usize) -> Vec<u8> {
    (0u8..=255).cycle().take(len).collect()
}

#[tokio::test]
async fn multi_segment_download_completes_and_file_matches() {
    let body = body_of(64 * 1024);
    let url = range_server::start(body.clone());
    let h = harness(AdmConfig::default()).await;

    let row = h
        .engine
        .add(AddRequest {
            url: format!("{}file.bin", url),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(row.resumable);
    assert_eq!(row.threads, 4);
    assert_eq!(row.total_size as usize, body.len());

    let status = h.engine.start(&row.id).await.unwrap();
    assert_eq!(status, DownloadStatus::Completed);

    let done = h.engine.get(&row.id).await.unwrap().unwrap();
    assert_eq!(done.status, DownloadStatus::Completed);
    assert_eq!(done.downloaded_bytes as usize, body.len());
    assert!(done.completed_at.is_some());

    let segs = h.engine.store().get_segments(&row.id).await.unwrap();
    assert_eq!(segs.len(), 4);
    assert!(segs.iter().all(|s| s.status == SegmentStatus::Completed));
    assert_eq!(segs[0].start_byte, 0);
    assert_eq!(segs[3].end_byte as usize, body.len() - 1);
    let sum: i64 = segs.iter().map(|s| s.downloaded_bytes).sum();
    assert_eq!(sum, done.downloaded_bytes);

    let content = std::fs::read(&done.save_path).unwrap();
    assert_eq!(content, body);
}

#[tokio::test]
async fn no_range_support_takes_single_connection_path() {
    let body = body_of(48 * 1024);
    let url = range_server::start_with_options(
        body.clone(),
        RangeServerOptions {
            support_ranges: false,
            advertise_ranges: false,
            ..Default::default()
        },
    );
    let h = harness(AdmConfig::default()).await;

    let row = h
        .engine
        .add(AddRequest {
            url: format!("{}data.bin", url),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(!row.resumable);
    assert_eq!(row.threads, 1);

    let status = h.engine.start(&row.id).await.unwrap();
    assert_eq!(status, DownloadStatus::Completed);
    // the single path never creates segment rows
    assert!(h.engine.store().get_segments(&row.id).await.unwrap().is_empty());

    let done = h.engine.get(&row.id).await.unwrap().unwrap();
    let content = std::fs::read(&done.save_path).unwrap();
    assert_eq!(content, body);
}

#[tokio::test]
async fn head_blocked_falls_back_to_range_probe_and_completes() {
    let body = body_of(32 * 1024);
    let url = range_server::start_with_options(
        body.clone(),
        RangeServerOptions {
            head_allowed: false,
            ..Default::default()
        },
    );
    let h = harness(AdmConfig::default()).await;

    let row = h
        .engine
        .add(AddRequest {
            url: format!("{}blocked.bin", url),
            ..Default::default()
        })
        .await
        .unwrap();
    // the ranged GET probe proved support despite the blocked HEAD
    assert!(row.resumable);
    assert_eq!(row.total_size as usize, body.len());

    assert_eq!(
        h.engine.start(&row.id).await.unwrap(),
        DownloadStatus::Completed
    );
    let done = h.engine.get(&row.id).await.unwrap().unwrap();
    assert_eq!(std::fs::read(&done.save_path).unwrap(), body);
}

#[tokio::test]
async fn http_429_waits_for_retry_after_then_succeeds() {
    let body = body_of(8 * 1024);
    let url = range_server::start_with_options(
        body.clone(),
        RangeServerOptions {
            fail_first_gets_with_429: 1,
            retry_after_secs: 1,
            ..Default::default()
        },
    );
    let mut cfg = AdmConfig::default();
    cfg.threads_per_download = 1;
    let h = harness(cfg).await;

    let row = h
        .engine
        .add(AddRequest {
            url: format!("{}throttled.bin", url),
            ..Default::default()
        })
        .await
        .unwrap();

    let started = Instant::now();
    assert_eq!(
        h.engine.start(&row.id).await.unwrap(),
        DownloadStatus::Completed
    );
    // Retry-After: 1 outranks the 50 ms test backoff.
    assert!(
        started.elapsed() >= Duration::from_secs(1),
        "completed after only {:?}",
        started.elapsed()
    );
    let done = h.engine.get(&row.id).await.unwrap().unwrap();
    assert_eq!(std::fs::read(&done.save_path).unwrap(), body);
}

#[tokio::test]
async fn pause_persists_progress_and_resume_restores_identical_bytes() {
    let body = body_of(300 * 1024);
    let url = range_server::start_with_options(
        body.clone(),
        RangeServerOptions {
            chunk_delay: Some(Duration::from_millis(10)),
            chunk_size: 4 * 1024,
            ..Default::default()
        },
    );
    let mut cfg = AdmConfig::default();
    cfg.threads_per_download = 2;
    let h = harness(cfg).await;

    let row = h
        .engine
        .add(AddRequest {
            url: format!("{}big.bin", url),
            ..Default::default()
        })
        .await
        .unwrap();

    let engine = h.engine.clone();
    let id = row.id.clone();
    let session = tokio::spawn(async move { engine.start(&id).await });

    // let a few chunks land, then pause mid-transfer
    tokio::time::sleep(Duration::from_millis(300)).await;
    h.engine.pause(&row.id).await.unwrap();
    let status = session.await.unwrap().unwrap();
    assert_eq!(status, DownloadStatus::Paused);

    let paused = h.engine.get(&row.id).await.unwrap().unwrap();
    assert!(paused.downloaded_bytes > 0, "nothing transferred before pause");
    assert!(
        paused.downloaded_bytes < paused.total_size,
        "transfer finished before the pause landed"
    );
    let segs = h.engine.store().get_segments(&row.id).await.unwrap();
    let sum: i64 = segs.iter().map(|s| s.downloaded_bytes).sum();
    assert_eq!(sum, paused.downloaded_bytes);

    assert_eq!(
        h.engine.resume(&row.id).await.unwrap(),
        DownloadStatus::Completed
    );
    let done = h.engine.get(&row.id).await.unwrap().unwrap();
    assert_eq!(done.downloaded_bytes as usize, body.len());
    assert_eq!(std::fs::read(&done.save_path).unwrap(), body);
}

#[tokio::test]
async fn checksum_mismatch_fails_after_transfer_and_keeps_file() {
    let body = body_of(16 * 1024);
    let url = range_server::start(body.clone());
    let h = harness(AdmConfig::default()).await;

    let row = h
        .engine
        .add(AddRequest {
            url: format!("{}sum.bin", url),
            checksum: Some("0".repeat(64)),
            checksum_type: Some(ChecksumType::Sha256),
            ..Default::default()
        })
        .await
        .unwrap();

    let status = h.engine.start(&row.id).await.unwrap();
    assert_eq!(status, DownloadStatus::Error);

    let failed = h.engine.get(&row.id).await.unwrap().unwrap();
    assert!(failed
        .error
        .as_deref()
        .unwrap()
        .contains("Checksum mismatch"));
    // the file stays on disk, full size, for inspection
    let meta = std::fs::metadata(&failed.save_path).unwrap();
    assert_eq!(meta.len() as usize, body.len());
}

#[tokio::test]
async fn cancel_deletes_partial_file_and_marks_cancelled() {
    let body = body_of(300 * 1024);
    let url = range_server::start_with_options(
        body.clone(),
        RangeServerOptions {
            chunk_delay: Some(Duration::from_millis(10)),
            chunk_size: 4 * 1024,
            ..Default::default()
        },
    );
    let h = harness(AdmConfig::default()).await;

    let row = h
        .engine
        .add(AddRequest {
            url: format!("{}gone.bin", url),
            ..Default::default()
        })
        .await
        .unwrap();

    let engine = h.engine.clone();
    let id = row.id.clone();
    let session = tokio::spawn(async move { engine.start(&id).await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    h.engine.cancel(&row.id).await.unwrap();
    let status = session.await.unwrap().unwrap();
    assert_eq!(status, DownloadStatus::Cancelled);

    let cancelled = h.engine.get(&row.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, DownloadStatus::Cancelled);
    assert_eq!(cancelled.downloaded_bytes, 0);
    assert!(cancelled.error.is_none(), "cancel is not an error");
    assert!(!Path::new(&cancelled.save_path).exists());
}

#[tokio::test]
async fn remove_drops_all_rows() {
    let body = body_of(8 * 1024);
    let url = range_server::start(body);
    let h = harness(AdmConfig::default()).await;

    let row = h
        .engine
        .add(AddRequest {
            url: format!("{}rm.bin", url),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(
        h.engine.start(&row.id).await.unwrap(),
        DownloadStatus::Completed
    );

    h.engine.remove(&row.id).await.unwrap();
    assert!(h.engine.get(&row.id).await.unwrap().is_none());
    assert!(h.engine.store().get_segments(&row.id).await.unwrap().is_empty());
    // completed files stay on disk
    assert!(Path::new(&row.save_path).exists());
}

#[tokio::test]
async fn queue_honors_concurrency_cap() {
    let body = body_of(60 * 1024);
    let url = range_server::start_with_options(
        body.clone(),
        RangeServerOptions {
            chunk_delay: Some(Duration::from_millis(10)),
            chunk_size: 8 * 1024,
            ..Default::default()
        },
    );
    let mut cfg = AdmConfig::default();
    cfg.max_concurrent_downloads = 3;
    cfg.threads_per_download = 1;
    let h = harness(cfg).await;

    let queue = QueueManager::new(h.engine.clone(), &h.cfg);
    let dispatcher = queue.spawn_dispatcher();

    let mut ids = Vec::new();
    for i in 0..6 {
        let row = h
            .engine
            .add(AddRequest {
                url: format!("{}many-{}.bin", url, i),
                ..Default::default()
            })
            .await
            .unwrap();
        queue.enqueue(&row.id, None).await.unwrap();
        ids.push(row.id);
    }

    let deadline = Instant::now() + Duration::from_secs(30);
    let mut max_active = 0usize;
    loop {
        max_active = max_active.max(h.engine.active_count());
        assert!(h.engine.active_count() <= 3, "concurrency cap exceeded");
        let mut done = 0;
        for id in &ids {
            let row = h.engine.get(id).await.unwrap().unwrap();
            if row.status == DownloadStatus::Completed {
                done += 1;
            }
        }
        if done == ids.len() {
            break;
        }
        assert!(Instant::now() < deadline, "queue never drained");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(max_active >= 2, "queue never ran downloads in parallel");
    dispatcher.abort();

    for id in &ids {
        let row = h.engine.get(id).await.unwrap().unwrap();
        assert_eq!(std::fs::read(&row.save_path).unwrap(), body);
    }
}

#[tokio::test]
async fn server_filename_from_content_disposition_wins_over_url() {
    let body = body_of(4 * 1024);
    let url = range_server::start_with_options(
        body,
        RangeServerOptions {
            content_disposition: Some("attachment; filename=\"named by server.iso\"".to_string()),
            ..Default::default()
        },
    );
    let h = harness(AdmConfig::default()).await;

    let row = h
        .engine
        .add(AddRequest {
            url: format!("{}url-tail.bin", url),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(row.filename, "named_by_server.iso");
    assert!(row.save_path.starts_with(&*h.downloads.path().to_string_lossy()));
}
