//! `adm schedule`: list, add, and remove scheduled downloads.

use anyhow::Result;
use clap::Subcommand;

use adm_core::store::{unix_timestamp_ms, RepeatRule};

#[derive(Subcommand)]
pub enum ScheduleCommand {
    /// Schedule a download to start later.
    Add {
        /// Download id to enqueue when the schedule fires.
        id: String,
        /// Minutes from now until the first trigger.
        #[arg(long)]
        in_minutes: i64,
        /// Recurrence: none, daily, or weekly.
        #[arg(long, default_value = "none")]
        repeat: String,
        /// Shut the machine down after the download completes.
        #[arg(long)]
        auto_shutdown: bool,
    },
    /// List schedules.
    List,
    /// Remove a schedule by its id.
    Remove { schedule_id: i64 },
}

pub async fn run(command: ScheduleCommand) -> Result<()> {
    let (_cfg, store, engine) = crate::cli::open_core().await?;
    match command {
        ScheduleCommand::Add {
            id,
            in_minutes,
            repeat,
            auto_shutdown,
        } => {
            if engine.get(&id).await?.is_none() {
                anyhow::bail!("download not found: {}", id);
            }
            let when = unix_timestamp_ms() + in_minutes * 60 * 1000;
            // Persist only; the daemon arms schedules at startup.
            let sid = store
                .insert_schedule(&id, when, RepeatRule::from_str(&repeat), auto_shutdown)
                .await?;
            println!("schedule {} stored for download {}", sid, id);
        }
        ScheduleCommand::List => {
            let schedules = store.list_schedules().await?;
            if schedules.is_empty() {
                println!("no schedules");
            }
            for s in schedules {
                println!(
                    "{}  download={}  at={}  repeat={}  auto_shutdown={}  enabled={}",
                    s.id,
                    s.download_id,
                    s.scheduled_time,
                    s.repeat.as_str(),
                    s.auto_shutdown,
                    s.enabled
                );
            }
        }
        ScheduleCommand::Remove { schedule_id } => {
            store.delete_schedule(schedule_id).await?;
            println!("schedule {} removed", schedule_id);
        }
    }
    Ok(())
}
