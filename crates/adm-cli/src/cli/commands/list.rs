//! `adm list` and `adm clear-completed`.

use anyhow::Result;

pub async fn run() -> Result<()> {
    let (_cfg, _store, engine) = crate::cli::open_core().await?;
    let rows = engine.list().await?;
    if rows.is_empty() {
        println!("no downloads");
        return Ok(());
    }
    for row in rows {
        let progress = if row.total_size > 0 {
            format!(
                "{}/{} ({}%)",
                row.downloaded_bytes,
                row.total_size,
                row.downloaded_bytes * 100 / row.total_size
            )
        } else {
            format!("{} bytes", row.downloaded_bytes)
        };
        println!(
            "{}  {:<11}  {:<8}  {}  {}",
            row.id,
            row.status.as_str(),
            row.priority.as_str(),
            progress,
            row.filename
        );
        if let Some(error) = &row.error {
            println!("    error: {}", error);
        }
    }
    Ok(())
}

pub async fn clear_completed() -> Result<()> {
    let (_cfg, _store, engine) = crate::cli::open_core().await?;
    let n = engine.clear_completed().await?;
    println!("removed {} completed download(s)", n);
    Ok(())
}
