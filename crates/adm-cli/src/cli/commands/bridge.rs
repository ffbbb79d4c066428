//! `adm bridge`: native-messaging shim for the browser extension.
//!
//! Speaks the browser's stdio framing (4-byte little-endian length + UTF-8
//! JSON body) and forwards each frame onto the daemon's newline-delimited
//! ingress socket. `{"type":"PING"}` is answered locally with
//! `{"status":"pong"}` without touching the engine.

use anyhow::{Context, Result};
use serde_json::{json, Value};

use adm_core::ingress;

use tokio::io::{self, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

/// Browsers cap native messages at 1 MiB toward the host.
const MAX_FRAME: usize = 1024 * 1024;

pub async fn run() -> Result<()> {
    let mut stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        let mut len_buf = [0u8; 4];
        match stdin.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e).context("read frame length"),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len == 0 || len > MAX_FRAME {
            anyhow::bail!("invalid frame length: {}", len);
        }
        let mut body = vec![0u8; len];
        stdin.read_exact(&mut body).await.context("read frame body")?;

        let reply = handle_message(&body).await;
        let out = serde_json::to_vec(&reply)?;
        stdout.write_all(&(out.len() as u32).to_le_bytes()).await?;
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }
}

async fn handle_message(body: &[u8]) -> Value {
    let frame: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => return json!({ "success": false, "error": format!("malformed frame: {}", e) }),
    };
    if frame.get("type").and_then(Value::as_str) == Some("PING") {
        return json!({ "status": "pong" });
    }
    match forward(&frame).await {
        Ok(reply) => reply,
        Err(e) => json!({ "success": false, "error": format!("{:#}", e) }),
    }
}

/// Relay one frame over the ingress line protocol and return the reply.
async fn forward(frame: &Value) -> Result<Value> {
    let path = ingress::default_socket_path()?;
    let mut stream = UnixStream::connect(&path)
        .await
        .context("adm daemon is not running")?;
    let mut line = frame.to_string();
    line.push('\n');
    stream.write_all(line.as_bytes()).await?;
    let (reader, _) = stream.split();
    let mut lines = BufReader::new(reader).lines();
    let reply = lines
        .next_line()
        .await?
        .context("daemon closed the ingress connection without replying")?;
    Ok(serde_json::from_str(&reply)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ping_answered_without_engine() {
        let reply = handle_message(br#"{"type":"PING"}"#).await;
        assert_eq!(reply, json!({ "status": "pong" }));
    }

    #[tokio::test]
    async fn malformed_frame_reports_error() {
        let reply = handle_message(b"{oops").await;
        assert_eq!(reply["success"], json!(false));
        assert!(reply["error"].as_str().unwrap().contains("malformed"));
    }
}
