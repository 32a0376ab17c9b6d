//! # sheetcron
//!
//! Calls URLs on a cron schedule. Each line of the schedule file is
//! `<minute> <hour> <day> <month> <weekday> <url>`:
//!
//! ```text
//! # refresh the cache every 15 minutes
//! */15 * * * * http://localhost:8080/api/v1/internal/refreshData
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use sheetcache::pinger::{load_schedule, Scheduler};
use sheetcache::shutdown::shutdown_signal;

/// Cron-to-webhook pinger
#[derive(Debug, Parser)]
#[command(name = "sheetcron", version)]
struct Args {
    /// Schedule file
    #[arg(short, long, env = "SHEETCRON_CONFIG", default_value = "cron.conf")]
    config: PathBuf,

    /// Seconds to wait for in-flight calls on shutdown
    #[arg(long, env = "SHEETCRON_GRACE_SECS", default_value_t = 5)]
    grace_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let jobs = load_schedule(&args.config).await?;

    let scheduler = Scheduler::new(jobs, Duration::from_secs(args.grace_secs))?;
    scheduler.run(shutdown_signal()).await;

    Ok(())
}
