//! Daemon control socket: one line per command, "pause <id>", "resume <id>",
//! "cancel <id>", "retry <id>", "remove <id>". The CLI client sends a line
//! and reads a single "ok" or "err <message>" reply.

use anyhow::Result;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use adm_core::engine::DownloadEngine;
use adm_core::queue::QueueManager;

pub fn default_control_socket_path() -> Result<PathBuf> {
    Ok(adm_core::config::state_dir()?.join("control.sock"))
}

/// Serve control commands for a running daemon.
pub fn spawn_control_listener(
    engine: DownloadEngine,
    queue: QueueManager,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    let handle = tokio::spawn(async move {
        let _ = std::fs::remove_file(&path);
        let listener = match UnixListener::bind(&path) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(path = %path.display(), "control socket bind: {}", e);
                return;
            }
        };
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let engine = engine.clone();
                    let queue = queue.clone();
                    tokio::spawn(async move {
                        let _ = serve_client(stream, engine, queue).await;
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

async fn serve_client(
    stream: UnixStream,
    engine: DownloadEngine,
    queue: QueueManager,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let Some(line) = lines.next_line().await? else {
        return Ok(());
    };
    let reply = match dispatch(&engine, &queue, line.trim()).await {
        Ok(()) => "ok\n".to_string(),
        Err(e) => format!("err {:#}\n", e),
    };
    writer.write_all(reply.as_bytes()).await?;
    writer.shutdown().await?;
    Ok(())
}

async fn dispatch(engine: &DownloadEngine, queue: &QueueManager, line: &str) -> Result<()> {
    let Some((verb, id)) = line.split_once(' ') else {
        anyhow::bail!("malformed control line");
    };
    let id = id.trim();
    match verb {
        "pause" => engine.pause(id).await,
        "resume" => queue.enqueue(id, None).await,
        "cancel" => engine.cancel(id).await,
        "retry" => {
            engine.reset(id).await?;
            queue.enqueue(id, None).await
        }
        "remove" => {
            queue.forget(id);
            engine.remove(id).await
        }
        other => anyhow::bail!("unknown control verb: {}", other),
    }
}

/// Send one command line to a running daemon. Returns false when no daemon
/// is listening so the caller can fall back to acting locally.
pub async fn send_command(verb: &str, id: &str) -> Result<bool> {
    let path = default_control_socket_path()?;
    let Ok(mut stream) = UnixStream::connect(&path).await else {
        return Ok(false);
    };
    stream
        .write_all(format!("{} {}\n", verb, id).as_bytes())
        .await?;
    let (reader, _) = stream.split();
    let mut lines = BufReader::new(reader).lines();
    match lines.next_line().await? {
        Some(reply) if reply.starts_with("ok") => Ok(true),
        Some(reply) => anyhow::bail!("daemon refused: {}", reply.trim_start_matches("err ").trim()),
        None => anyhow::bail!("daemon closed the connection without replying"),
    }
}
