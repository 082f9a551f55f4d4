//! Taskbell command-line entry point.
//!
//! # Responsibility
//! - Wire config, logging, storage and mail transport for the reminder core.
//! - Expose the cadence runner, a one-shot sweep and the manual trigger.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use taskbell_core::{Config, ReminderTier};

mod runner;

#[derive(Parser)]
#[command(name = "taskbell")]
#[command(about = "Emails due-soon task reminders", long_about = None)]
#[command(version)]
struct Cli {
    /// SQLite database path (overrides TASKBELL_DB_PATH)
    #[arg(long, global = true)]
    db: Option<std::path::PathBuf>,

    /// Log instead of sending email
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sweep for due-soon tasks on a fixed cadence until interrupted
    Run,
    /// Run exactly one sweep and print its summary as JSON
    Sweep {
        /// Evaluate windows at this RFC 3339 instant instead of now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Send a test reminder for one task to its owner
    SendTest {
        #[arg(long)]
        task_id: String,
        /// Authenticated caller uid; must own the task
        #[arg(long)]
        caller: Option<String>,
        /// Reminder tier in minutes (15 or 30)
        #[arg(long, value_parser = parse_tier)]
        tier: Option<ReminderTier>,
    },
}

fn parse_tier(value: &str) -> Result<ReminderTier, String> {
    let minutes: u32 = value
        .parse()
        .map_err(|_| format!("`{value}` is not a number"))?;
    ReminderTier::try_from(minutes).map_err(|err| err.to_string())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env().context("invalid configuration")?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    taskbell_core::init_logging(config.log_level, config.log_dir.as_deref())
        .map_err(anyhow::Error::msg)
        .context("failed to initialize logging")?;

    let app = Arc::new(runner::App::open(config, cli.dry_run)?);

    match cli.command {
        Commands::Run => app.run_forever().await?,
        Commands::Sweep { at } => {
            let summary = app.sweep_once(at)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::SendTest {
            task_id,
            caller,
            tier,
        } => {
            let (payload, ok) = app.send_test(&task_id, caller.as_deref(), tier)?;
            println!("{}", serde_json::to_string_pretty(&payload)?);
            if !ok {
                anyhow::bail!("test notification for task {task_id} was not sent");
            }
        }
    }

    Ok(())
}
