//! Lifecycle commands: pause, resume, cancel, retry, remove.
//!
//! Prefer a running daemon (it owns the active sessions); fall back to
//! acting on the database directly when none is up.

use anyhow::Result;

use crate::cli::control_socket;

pub async fn run(verb: &str, id: &str) -> Result<()> {
    if control_socket::send_command(verb, id).await? {
        println!("{} {}: ok", verb, id);
        return Ok(());
    }

    let (_cfg, _store, engine) = crate::cli::open_core().await?;
    match verb {
        "pause" => engine.pause(id).await?,
        // Without a daemon the resume runs to completion in this process.
        "resume" => {
            let status = engine.resume(id).await?;
            println!("resume {}: finished in state {}", id, status.as_str());
            return Ok(());
        }
        "retry" => {
            let status = engine.retry(id).await?;
            println!("retry {}: finished in state {}", id, status.as_str());
            return Ok(());
        }
        "cancel" => engine.cancel(id).await?,
        "remove" => engine.remove(id).await?,
        other => anyhow::bail!("unknown command: {}", other),
    }
    println!("{} {}: ok", verb, id);
    Ok(())
}
