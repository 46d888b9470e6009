//! `reviewsync load [ids...]` and `reviewsync autoload [on|off]`.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use colored::Colorize;
use serde::Deserialize;

use reviewsync_daemon::{request_autoload, request_load};

use super::{daemon_call, home_dir};

/// Add pending candidates to the board.
#[derive(Args, Debug)]
pub struct LoadArgs {
    /// Candidate ids to load. Loads every candidate when omitted.
    pub ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LoadReport {
    added: Vec<String>,
    #[serde(default)]
    skipped: Vec<String>,
    #[serde(default)]
    unknown: Vec<String>,
}

impl LoadArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let ids = (!self.ids.is_empty()).then_some(self.ids);
        let payload = daemon_call(request_load(&home, ids), "load candidates")?;
        let report: LoadReport =
            serde_json::from_value(payload).context("unexpected load response from daemon")?;

        if report.added.is_empty() {
            println!("nothing loaded");
        } else {
            println!(
                "{} loaded {} record(s): {}",
                "✓".green(),
                report.added.len(),
                report.added.join(", ")
            );
        }
        if !report.skipped.is_empty() {
            println!(
                "  skipped {} (already on the board or no longer in scope)",
                report.skipped.join(", ")
            );
        }
        for id in &report.unknown {
            eprintln!("{} '{id}' is not a pending candidate", "!".yellow());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

/// Show or change whether new in-scope records join the board on their own.
#[derive(Args, Debug)]
pub struct AutoloadArgs {
    /// New setting; prints the current one when omitted.
    #[arg(value_enum)]
    pub state: Option<Toggle>,
}

impl AutoloadArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let enabled = self.state.map(|state| state == Toggle::On);
        let payload = daemon_call(request_autoload(&home, enabled), "update autoload")?;
        let current = payload
            .get("autoload")
            .and_then(serde_json::Value::as_bool)
            .context("unexpected autoload response from daemon")?;
        println!("autoload: {}", if current { "on" } else { "off" });
        Ok(())
    }
}
