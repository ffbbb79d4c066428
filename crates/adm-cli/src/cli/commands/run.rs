//! `adm run`: the daemon hosting queue, scheduler, pump, and both sockets.

use anyhow::Result;

use adm_core::ingress;
use adm_core::pump::ProgressPump;
use adm_core::queue::QueueManager;
use adm_core::schedule::Scheduler;
use adm_core::store::DownloadStatus;

use crate::cli::control_socket;

pub async fn run() -> Result<()> {
    let (cfg, store, engine) = crate::cli::open_core().await?;

    let recovered = store.recover_interrupted().await?;
    if recovered > 0 {
        tracing::info!(recovered, "normalized downloads stranded by a previous run");
    }

    let queue = QueueManager::new(engine.clone(), &cfg);
    let _dispatcher = queue.spawn_dispatcher();

    let scheduler = Scheduler::new(store.clone(), queue.clone());
    scheduler.start().await?;

    let pump = ProgressPump::new(engine.clone());
    let _pump_task = pump.spawn();

    let _control = control_socket::spawn_control_listener(
        engine.clone(),
        queue.clone(),
        control_socket::default_control_socket_path()?,
    )?;
    let _ingress = ingress::serve(&ingress::default_socket_path()?, engine.clone(), queue.clone()).await?;

    // Anything already waiting gets a slot as capacity allows.
    for status in [DownloadStatus::Queued, DownloadStatus::Pending] {
        for row in store.list_by_status(status).await? {
            queue.enqueue(&row.id, None).await?;
        }
    }

    println!("adm daemon running; ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    println!("shutting down");
    queue.pause_all().await?;
    Ok(())
}
