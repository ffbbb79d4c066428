//! Command-line surface: argument parsing and command dispatch.

mod commands;
mod control_socket;

use anyhow::Result;
use clap::{Parser, Subcommand};

use adm_core::checksum::ChecksumType;
use adm_core::config::{self, AdmConfig};
use adm_core::engine::{DownloadEngine, EngineSettings};
use adm_core::store::{Priority, Store};

#[derive(Parser)]
#[command(name = "adm", version, about = "Accelerated download manager")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add a download (handed to a running daemon when one is up).
    Add {
        url: String,
        /// Save under this name instead of the server-suggested one.
        #[arg(long)]
        filename: Option<String>,
        /// Referer header to send with every request.
        #[arg(long)]
        referrer: Option<String>,
        /// Expected hash of the finished file, lowercase hex.
        #[arg(long)]
        checksum: Option<String>,
        /// Hash algorithm: md5, sha1, sha256, or sha512.
        #[arg(long)]
        checksum_type: Option<String>,
        /// Queue priority: high, normal, or low.
        #[arg(long)]
        priority: Option<String>,
        /// Download immediately in this process instead of queueing.
        #[arg(long)]
        now: bool,
    },
    /// List all downloads.
    List,
    /// Pause a download.
    Pause { id: String },
    /// Resume a paused, failed, or cancelled download.
    Resume { id: String },
    /// Cancel a download and delete its partial file.
    Cancel { id: String },
    /// Restart a download from scratch.
    Retry { id: String },
    /// Remove a download and its records.
    Remove { id: String },
    /// Delete all completed rows.
    ClearCompleted,
    /// Manage scheduled downloads.
    Schedule {
        #[command(subcommand)]
        command: commands::schedule::ScheduleCommand,
    },
    /// Run the daemon: queue, scheduler, progress pump, ingress socket.
    Run,
    /// Native-messaging shim between a browser extension and the daemon.
    Bridge,
}

impl Cli {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        match cli.command {
            Command::Add {
                url,
                filename,
                referrer,
                checksum,
                checksum_type,
                priority,
                now,
            } => {
                let checksum_type = checksum_type
                    .as_deref()
                    .map(|s| {
                        ChecksumType::parse(s)
                            .ok_or_else(|| anyhow::anyhow!("unknown checksum type: {}", s))
                    })
                    .transpose()?;
                let priority = priority.as_deref().map(Priority::from_str);
                commands::add::run(
                    url, filename, referrer, checksum, checksum_type, priority, now,
                )
                .await
            }
            Command::List => commands::list::run().await,
            Command::Pause { id } => commands::control::run("pause", &id).await,
            Command::Resume { id } => commands::control::run("resume", &id).await,
            Command::Cancel { id } => commands::control::run("cancel", &id).await,
            Command::Retry { id } => commands::control::run("retry", &id).await,
            Command::Remove { id } => commands::control::run("remove", &id).await,
            Command::ClearCompleted => commands::list::clear_completed().await,
            Command::Schedule { command } => commands::schedule::run(command).await,
            Command::Run => commands::run::run().await,
            Command::Bridge => commands::bridge::run().await,
        }
    }
}

/// Open the shared core: config, database, engine.
pub(crate) async fn open_core() -> Result<(AdmConfig, Store, DownloadEngine)> {
    let cfg = config::load_or_init()?;
    let store = Store::open_default().await?;
    let engine = DownloadEngine::new(store.clone(), EngineSettings::from(&cfg));
    Ok((cfg, store, engine))
}
