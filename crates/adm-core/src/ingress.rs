//! Local ingress socket for externally-submitted URLs.
//!
//! A Unix domain socket accepting one newline-delimited JSON frame per
//! connection: `{url, filename?, referrer?, fileSize?, mime?}`. Each frame
//! runs `engine.add` + `queue.enqueue`; the reply frame is written back and
//! the connection closed. Malformed frames get an error reply without
//! tearing the listener down. A leftover socket file from a dead process is
//! detected with a connect probe and replaced.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::engine::{AddRequest, DownloadEngine};
use crate::queue::QueueManager;

/// Inbound frame, as produced by the browser bridge.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressFrame {
    pub url: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub mime: Option<String>,
}

/// Outbound reply frame.
#[derive(Debug, Clone, Serialize)]
pub struct IngressReply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngressReply {
    fn ok(id: String, filename: String) -> Self {
        Self {
            success: true,
            id: Some(id),
            filename: Some(filename),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            id: None,
            filename: None,
            error: Some(message.into()),
        }
    }
}

/// Default endpoint, next to the database.
pub fn default_socket_path() -> Result<PathBuf> {
    Ok(crate::config::state_dir()?.join("ingress.sock"))
}

/// Bind the ingress socket and serve connections until the task is aborted.
pub async fn serve(
    path: &Path,
    engine: DownloadEngine,
    queue: QueueManager,
) -> Result<tokio::task::JoinHandle<()>> {
    let listener = bind_or_replace(path).await?;
    tracing::info!(path = %path.display(), "ingress socket listening");

    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let engine = engine.clone();
                    let queue = queue.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_client(stream, engine, queue).await {
                            tracing::debug!("ingress client error: {:#}", e);
                        }
                    });
                }
                Err(e) => tracing::debug!("ingress accept: {}", e),
            }
        }
    });
    Ok(handle)
}

/// Bind, replacing a stale socket file whose owner no longer answers.
async fn bind_or_replace(path: &Path) -> Result<UnixListener> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match UnixListener::bind(path) {
        Ok(l) => Ok(l),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            if UnixStream::connect(path).await.is_ok() {
                anyhow::bail!("ingress endpoint {} is already being served", path.display());
            }
            std::fs::remove_file(path)
                .with_context(|| format!("replace stale socket {}", path.display()))?;
            UnixListener::bind(path).context("rebind ingress socket")
        }
        Err(e) => Err(e).context("bind ingress socket"),
    }
}

async fn serve_client(
    stream: UnixStream,
    engine: DownloadEngine,
    queue: QueueManager,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let reply = match lines.next_line().await? {
        Some(line) => handle_frame(&engine, &queue, &line).await,
        None => return Ok(()),
    };
    let mut out = serde_json::to_string(&reply)?;
    out.push('\n');
    writer.write_all(out.as_bytes()).await?;
    writer.shutdown().await?;
    Ok(())
}

async fn handle_frame(engine: &DownloadEngine, queue: &QueueManager, line: &str) -> IngressReply {
    let frame: IngressFrame = match serde_json::from_str(line.trim()) {
        Ok(frame) => frame,
        Err(e) => return IngressReply::err(format!("malformed frame: {}", e)),
    };
    tracing::info!(url = %frame.url, "ingress frame received");
    let row = match engine
        .add(AddRequest {
            url: frame.url,
            filename: frame.filename,
            referrer: frame.referrer,
            ..Default::default()
        })
        .await
    {
        Ok(row) => row,
        Err(e) => return IngressReply::err(format!("{:#}", e)),
    };
    if let Err(e) = queue.enqueue(&row.id, None).await {
        return IngressReply::err(format!("{:#}", e));
    }
    IngressReply::ok(row.id, row.filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdmConfig;
    use crate::engine::EngineSettings;
    use crate::store::Store;

    async fn harness(dir: &Path) -> (DownloadEngine, QueueManager) {
        let store = Store::open_at(dir.join("t.db")).await.unwrap();
        let mut cfg = AdmConfig::default();
        cfg.download_dir = dir.join("downloads");
        let engine = DownloadEngine::new(store, EngineSettings::from(&cfg));
        let queue = QueueManager::new(engine.clone(), &cfg);
        (engine, queue)
    }

    #[test]
    fn frame_parses_browser_field_names() {
        let frame: IngressFrame = serde_json::from_str(
            r#"{"url":"https://example.com/a.zip","fileSize":123,"referrer":"https://example.com"}"#,
        )
        .unwrap();
        assert_eq!(frame.url, "https://example.com/a.zip");
        assert_eq!(frame.file_size, Some(123));
        assert_eq!(frame.referrer.as_deref(), Some("https://example.com"));
        assert!(frame.filename.is_none());
    }

    #[test]
    fn reply_omits_absent_fields() {
        let out = serde_json::to_string(&IngressReply::err("nope")).unwrap();
        assert_eq!(out, r#"{"success":false,"error":"nope"}"#);
        let out = serde_json::to_string(&IngressReply::ok("id1".into(), "f.bin".into())).unwrap();
        assert_eq!(out, r#"{"success":true,"id":"id1","filename":"f.bin"}"#);
    }

    #[tokio::test]
    async fn malformed_frame_gets_error_reply() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, queue) = harness(dir.path()).await;
        let reply = handle_frame(&engine, &queue, "{not json").await;
        assert!(!reply.success);
        assert!(reply.error.unwrap().contains("malformed"));
    }

    #[tokio::test]
    async fn unsupported_scheme_gets_error_reply() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, queue) = harness(dir.path()).await;
        let reply = handle_frame(&engine, &queue, r#"{"url":"ftp://example.com/x"}"#).await;
        assert!(!reply.success);
        assert!(reply.error.unwrap().contains("scheme"));
    }

    #[tokio::test]
    async fn stale_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("ingress.sock");
        // A socket file with no listener behind it.
        drop(UnixListener::bind(&sock).unwrap());
        assert!(sock.exists());
        let listener = bind_or_replace(&sock).await.unwrap();
        drop(listener);
    }
}
