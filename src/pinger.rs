//! # Cron Pinger
//!
//! Reads a schedule file of `<minute> <hour> <day> <month> <weekday> <url>`
//! lines and issues a GET to each URL whenever its schedule fires.
//! Blank lines and `#` comments are ignored; malformed lines are logged and
//! skipped without aborting the rest of the file.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use reqwest::Client;
use std::collections::BTreeSet;
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Timeout for a single webhook call
pub const PING_TIMEOUT: Duration = Duration::from_secs(10);

/// One scheduled webhook
#[derive(Debug, Clone)]
pub struct CronJob {
    pub expression: String,
    pub url: String,
    schedules: Vec<Schedule>,
}

impl CronJob {
    /// Builds a job from a standard 5-field expression. When both day fields
    /// are restricted the job fires when either one matches, so each day
    /// field gets its own schedule.
    pub fn new(expression: &str, url: &str) -> Result<Self, cron::error::Error> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let schedules = match fields.as_slice() {
            [minute, hour, day, month, weekday] => {
                let weekday = translate_weekday(weekday);
                let build = |day: &str, weekday: &str| {
                    Schedule::from_str(&format!(
                        "0 {} {} {} {} {}",
                        minute, hour, day, month, weekday
                    ))
                };
                if is_restricted(day) && is_restricted(&weekday) {
                    vec![build(day, "*")?, build("*", &weekday)?]
                } else {
                    vec![build(day, &weekday)?]
                }
            }
            _ => vec![Schedule::from_str(&format!("0 {}", expression))?],
        };

        Ok(Self {
            expression: expression.to_string(),
            url: url.to_string(),
            schedules,
        })
    }

    /// First fire time strictly after `after`
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(after).next())
            .min()
    }

    /// Next `count` fire times after now
    pub fn upcoming(&self, count: usize) -> Vec<DateTime<Utc>> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = Utc::now();
        while times.len() < count {
            match self.next_after(&cursor) {
                Some(next) => {
                    times.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        times
    }
}

fn is_restricted(field: &str) -> bool {
    field != "*" && field != "?"
}

/// Standard cron numbers weekdays 0-7 from Sunday (0 and 7 both Sunday);
/// the evaluator numbers them 1-7 from Sunday. Numeric items are expanded
/// to explicit day lists. Names and `*` pass through.
fn translate_weekday(field: &str) -> String {
    field
        .split(',')
        .map(translate_weekday_item)
        .collect::<Vec<_>>()
        .join(",")
}

fn translate_weekday_item(item: &str) -> String {
    let (base, step) = match item.split_once('/') {
        Some((base, step)) => (base, Some(step)),
        None => (item, None),
    };
    let bounds = match base.split_once('-') {
        Some((start, end)) => start.parse::<u8>().ok().zip(end.parse::<u8>().ok()),
        // `N/step` runs to the end of the week
        None if step.is_some() => base.parse::<u8>().ok().map(|n| (n, 6)),
        None => base.parse::<u8>().ok().map(|n| (n, n)),
    };
    let step = match step.map(str::parse::<usize>) {
        None => Some(1),
        Some(Ok(n)) if n > 0 => Some(n),
        Some(_) => None,
    };

    match (bounds, step) {
        (Some((start, end)), Some(step)) if start <= end && end <= 7 => {
            let days: BTreeSet<u8> = (start..=end).step_by(step).map(|n| (n % 7) + 1).collect();
            days.iter().map(u8::to_string).collect::<Vec<_>>().join(",")
        }
        _ => item.to_string(),
    }
}

/// Parses schedule file contents, logging and skipping malformed lines
pub fn parse_schedule(contents: &str) -> Vec<CronJob> {
    let mut jobs = Vec::new();

    for (index, raw) in contents.lines().enumerate() {
        let line_number = index + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 6 {
            warn!("Line {}: invalid format, skipping", line_number);
            continue;
        }

        let expression = parts[..5].join(" ");
        let url = parts[5..].join(" ");
        match CronJob::new(&expression, &url) {
            Ok(job) => {
                info!("Scheduled job: {} => {}", expression, url);
                jobs.push(job);
            }
            Err(e) => {
                warn!(
                    "Line {}: invalid cron expression '{}': {}",
                    line_number, expression, e
                );
            }
        }
    }

    jobs
}

/// Reads and parses a schedule file
pub async fn load_schedule(path: &Path) -> Result<Vec<CronJob>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Error opening {}", path.display()))?;
    Ok(parse_schedule(&contents))
}

/// Issues one GET and logs the outcome
pub async fn ping(client: &Client, url: &str) -> Option<reqwest::StatusCode> {
    info!("Calling URL: {}", url);
    match client.get(url).send().await {
        Ok(response) => {
            info!("URL {} returned status: {}", url, response.status());
            Some(response.status())
        }
        Err(e) => {
            error!("Error calling {}: {}", url, e);
            None
        }
    }
}

async fn run_job(job: CronJob, client: Client, mut shutdown: watch::Receiver<bool>) {
    let mut in_flight = JoinSet::new();
    let mut last = Utc::now();

    while let Some(next) = job.next_after(&last) {
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                last = next;
                let client = client.clone();
                let url = job.url.clone();
                in_flight.spawn(async move {
                    ping(&client, &url).await;
                });
            }
            _ = shutdown.changed() => break,
        }

        while in_flight.try_join_next().is_some() {}
    }

    while in_flight.join_next().await.is_some() {}
}

/// Runs jobs until `shutdown` resolves, then stops new firings and waits up
/// to `grace` for in-flight calls
pub struct Scheduler {
    jobs: Vec<CronJob>,
    client: Client,
    grace: Duration,
}

impl Scheduler {
    pub fn new(jobs: Vec<CronJob>, grace: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(PING_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            jobs,
            client,
            grace,
        })
    }

    /// Returns true when every job finished within the grace period
    pub async fn run<F>(self, shutdown: F) -> bool
    where
        F: Future<Output = ()>,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();
        for job in self.jobs {
            tasks.spawn(run_job(job, self.client.clone(), stop_rx.clone()));
        }
        info!("Cron scheduler started with {} jobs", tasks.len());

        shutdown.await;
        info!("Shutting down cron scheduler...");
        let _ = stop_tx.send(true);

        let drained = tokio::time::timeout(self.grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        match drained {
            Ok(()) => {
                info!("All jobs completed");
                true
            }
            Err(_) => {
                warn!("Timeout waiting for jobs to finish");
                tasks.abort_all();
                false
            }
        }
    }
}
