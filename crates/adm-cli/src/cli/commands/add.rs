//! `adm add`: register a download, via the daemon's ingress socket when one
//! is running, otherwise directly against the database.

use anyhow::{Context, Result};

use adm_core::checksum::ChecksumType;
use adm_core::engine::AddRequest;
use adm_core::ingress;
use adm_core::store::{DownloadStatus, Priority};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

pub async fn run(
    url: String,
    filename: Option<String>,
    referrer: Option<String>,
    checksum: Option<String>,
    checksum_type: Option<ChecksumType>,
    priority: Option<Priority>,
    now: bool,
) -> Result<()> {
    // Plain adds go through a running daemon so it owns probing and queueing.
    if !now && checksum.is_none() {
        if let Some(reply) = try_daemon(&url, filename.as_deref(), referrer.as_deref()).await? {
            println!("{}", reply.trim());
            return Ok(());
        }
    }

    let (_cfg, _store, engine) = crate::cli::open_core().await?;
    let row = engine
        .add(AddRequest {
            url,
            filename,
            referrer,
            checksum,
            checksum_type,
            priority,
        })
        .await?;
    println!("added {} -> {}", row.id, row.save_path);

    if now {
        let status = engine.start(&row.id).await?;
        match status {
            DownloadStatus::Completed => println!("completed: {}", row.save_path),
            other => println!("finished in state {}", other.as_str()),
        }
    } else {
        println!("queued as pending; a running daemon will pick it up after `adm resume {}`", row.id);
    }
    Ok(())
}

/// Forward the add as an ingress frame. `None` when no daemon is listening.
async fn try_daemon(
    url: &str,
    filename: Option<&str>,
    referrer: Option<&str>,
) -> Result<Option<String>> {
    let path = ingress::default_socket_path()?;
    let Ok(mut stream) = UnixStream::connect(&path).await else {
        return Ok(None);
    };
    let mut frame = serde_json::json!({ "url": url });
    if let Some(name) = filename {
        frame["filename"] = name.into();
    }
    if let Some(referrer) = referrer {
        frame["referrer"] = referrer.into();
    }
    let mut line = frame.to_string();
    line.push('\n');
    stream.write_all(line.as_bytes()).await?;
    let (reader, _) = stream.split();
    let mut lines = BufReader::new(reader).lines();
    let reply = lines
        .next_line()
        .await?
        .context("daemon closed the ingress connection without replying")?;
    Ok(Some(reply))
}
