//! `reviewsync status`: daemon, checkpoint and board visibility.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tabled::{settings::Style, Table, Tabled};

use reviewsync_core::{config, ConfigError};
use reviewsync_daemon::{request_status, DaemonError};
use reviewsync_sync::{FileStateStore, StateStore};

use super::{home_dir, print_json};

/// Arguments for `reviewsync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let report = build_report(&home)?;
        if self.json {
            return print_json(&report);
        }
        print_table(&report);
        Ok(())
    }
}

/// Subset of the daemon `status` payload the CLI shows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct DaemonStatus {
    running: bool,
    schedule: Option<String>,
    polling: bool,
    records: usize,
    candidates: usize,
    saves_in_flight: usize,
    started_at_unix: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
struct StatusReport {
    config: Option<String>,
    table: Option<String>,
    daemon: DaemonStatus,
    checkpoint: Option<DateTime<Utc>>,
    autoload: bool,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "")]
    key: &'static str,
    #[tabled(rename = "")]
    value: String,
}

fn build_report(home: &Path) -> Result<StatusReport> {
    let (config_path, table) = match config::load_at(home) {
        Ok(cfg) => (
            Some(config::config_path_at(home).display().to_string()),
            Some(format!("{}/{}", cfg.remote.base_id, cfg.remote.table_id)),
        ),
        Err(ConfigError::NotFound { .. }) => (None, None),
        Err(err) => return Err(err).context("failed to load config"),
    };

    let live = match request_status(home) {
        Ok(payload) => Some(payload),
        Err(DaemonError::DaemonNotRunning { .. }) => None,
        Err(err) => return Err(err).context("failed to query daemon status"),
    };

    // Checkpoint and autoload come from the daemon when it is up, else from
    // the persisted state file.
    let (daemon, checkpoint, autoload) = match live {
        Some(payload) => {
            let checkpoint = payload
                .get("checkpoint")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok());
            let autoload = payload
                .get("autoload")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(true);
            let daemon: DaemonStatus =
                serde_json::from_value(payload).context("unexpected daemon status payload")?;
            (daemon, checkpoint, autoload)
        }
        None => {
            let state = FileStateStore::at_home(home)
                .load()
                .context("failed to read persisted sync state")?;
            (DaemonStatus::default(), state.checkpoint, state.autoload)
        }
    };

    Ok(StatusReport {
        config: config_path,
        table,
        daemon,
        checkpoint,
        autoload,
    })
}

fn print_table(report: &StatusReport) {
    println!("reviewsync v{}", env!("CARGO_PKG_VERSION"));

    let daemon = if report.daemon.running {
        format!("{} running", "■".green().bold())
    } else {
        format!("{} stopped", "■".bright_black().bold())
    };
    let checkpoint = match report.checkpoint {
        Some(ts) => format!("{} ({})", ts.to_rfc3339(), format_age(ts, Utc::now())),
        None => "none".to_string(),
    };

    let mut rows = vec![
        StatusTableRow {
            key: "config",
            value: report.config.clone().unwrap_or_else(|| "missing".to_string()),
        },
        StatusTableRow {
            key: "table",
            value: report.table.clone().unwrap_or_else(|| "-".to_string()),
        },
        StatusTableRow {
            key: "daemon",
            value: daemon,
        },
        StatusTableRow {
            key: "checkpoint",
            value: checkpoint,
        },
        StatusTableRow {
            key: "autoload",
            value: if report.autoload { "on" } else { "off" }.to_string(),
        },
    ];
    if report.daemon.running {
        let schedule = report.daemon.schedule.as_deref().unwrap_or("stopped");
        let schedule = match schedule {
            "running" => schedule.green().to_string(),
            "paused" => schedule.yellow().to_string(),
            other => other.bright_black().to_string(),
        };
        rows.extend([
            StatusTableRow {
                key: "schedule",
                value: if report.daemon.polling {
                    format!("{schedule} (polling)")
                } else {
                    schedule
                },
            },
            StatusTableRow {
                key: "records",
                value: report.daemon.records.to_string(),
            },
            StatusTableRow {
                key: "candidates",
                value: report.daemon.candidates.to_string(),
            },
            StatusTableRow {
                key: "saves in flight",
                value: report.daemon.saves_in_flight.to_string(),
            },
        ]);
    }

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if report.config.is_none() {
        println!("Run 'reviewsync init --base-id <id> --table-id <id>' to configure a table.");
    } else if !report.daemon.running {
        println!("Run 'reviewsync daemon start' to begin syncing.");
    }
}

/// Coarse human age of `ts` relative to `now`.
fn format_age(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - ts).num_seconds();
    if secs < 0 {
        return "in the future".to_string();
    }
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}
