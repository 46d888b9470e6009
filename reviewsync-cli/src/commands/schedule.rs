//! `reviewsync poll | pause | resume`

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Deserialize;
use serde_json::Value;

use reviewsync_daemon::{request_pause, request_poll, request_resume};

use super::{daemon_call, home_dir};

#[derive(Debug, Clone, Copy)]
pub enum ScheduleCommand {
    Poll,
    Pause,
    Resume,
}

/// Wire form of one completed poll.
#[derive(Debug, Deserialize)]
struct PollReport {
    fetched: usize,
    added: Vec<String>,
    removed: Vec<String>,
    #[serde(default)]
    deferred: Vec<String>,
    #[serde(default)]
    withdrawn: Vec<String>,
    checkpoint: DateTime<Utc>,
    #[serde(default)]
    duration_ms: u64,
}

pub fn run(command: ScheduleCommand) -> Result<()> {
    let home = home_dir()?;

    match command {
        ScheduleCommand::Poll => {
            let payload = daemon_call(request_poll(&home), "poll")?;
            print_poll(payload)?;
        }
        ScheduleCommand::Pause => {
            let payload = daemon_call(request_pause(&home), "pause schedule")?;
            println!("schedule: {}", schedule_of(&payload));
        }
        ScheduleCommand::Resume => {
            let payload = daemon_call(request_resume(&home), "resume schedule")?;
            println!("schedule: {}", schedule_of(&payload));
        }
    }
    Ok(())
}

fn schedule_of(payload: &Value) -> &str {
    payload
        .get("schedule")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
}

fn print_poll(payload: Value) -> Result<()> {
    if payload.get("skipped").and_then(Value::as_bool) == Some(true) {
        println!("a poll is already running; nothing to do");
        return Ok(());
    }
    let report: PollReport =
        serde_json::from_value(payload).context("unexpected poll response from daemon")?;

    println!(
        "{} poll complete in {}ms: {} fetched, {} added, {} removed",
        "✓".green(),
        report.duration_ms,
        report.fetched,
        report.added.len(),
        report.removed.len(),
    );
    if !report.deferred.is_empty() {
        println!(
            "  {} new candidate(s) waiting; run 'reviewsync candidates'",
            report.deferred.len()
        );
    }
    if !report.withdrawn.is_empty() {
        println!(
            "  {} candidate(s) left scope before loading: {}",
            report.withdrawn.len(),
            report.withdrawn.join(", ")
        );
    }
    println!("  checkpoint: {}", report.checkpoint.to_rfc3339());
    Ok(())
}
