//! `reviewsync list` and `reviewsync candidates`: board and pending records.

use std::cmp::Ordering;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use reviewsync_core::FieldValue;
use reviewsync_daemon::{request_candidates, request_list, request_refresh_names};
use reviewsync_sync::{BoardQuery, ResolvedRecord};

use super::{daemon_call, home_dir, print_json};

const SUMMARY_WIDTH: usize = 72;

/// Arguments for `reviewsync list`.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Case-insensitive match against the record id, every field value and
    /// the names behind link fields.
    #[arg(long, short = 's')]
    pub search: Option<String>,

    /// Only records whose technician has exactly this name.
    #[arg(long)]
    pub tech: Option<String>,

    /// Only records whose branch has exactly this name.
    #[arg(long)]
    pub branch: Option<String>,

    /// Field to sort by. Numbers sort numerically, link fields by name;
    /// records missing the field go last.
    #[arg(long)]
    pub sort: Option<String>,

    /// Reverse the sort order.
    #[arg(long)]
    pub desc: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl ListArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let query = BoardQuery {
            search: self.search,
            tech: self.tech,
            branch: self.branch,
        };
        let payload = daemon_call(request_list(&home, &query), "list records")?;
        let mut records = decode_records(payload)?;

        sort_records(&mut records, self.sort.as_deref());
        if self.desc {
            records.reverse();
        }

        if self.json {
            return print_json(&records);
        }
        print_records(&records, "No records on the board.");
        Ok(())
    }
}

/// Arguments for `reviewsync candidates`.
#[derive(Args, Debug)]
pub struct CandidatesArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl CandidatesArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let payload = daemon_call(request_candidates(&home), "list candidates")?;
        let records = decode_records(payload)?;

        if self.json {
            return print_json(&records);
        }
        print_records(&records, "No candidates waiting.");
        if !records.is_empty() {
            println!("Run 'reviewsync load' to add them, or 'reviewsync load <id>...' for a subset.");
        }
        Ok(())
    }
}

/// Arguments for `reviewsync names`.
#[derive(Args, Debug)]
pub struct NamesArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl NamesArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let payload = daemon_call(request_refresh_names(&home), "refresh linked names")?;
        if self.json {
            return print_json(&payload);
        }
        let count = |key: &str| payload.get(key).and_then(Value::as_u64).unwrap_or(0);
        println!(
            "refreshed {} linked table(s); {} name(s) known",
            count("tables"),
            count("names")
        );
        let failed: Vec<&str> = payload
            .get("failed")
            .and_then(Value::as_array)
            .map(|tables| tables.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if !failed.is_empty() {
            eprintln!("  could not list: {} (previous names kept)", failed.join(", "));
        }
        Ok(())
    }
}

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "created")]
    created: String,
    #[tabled(rename = "fields")]
    fields: String,
}

pub(crate) fn decode_records(payload: Value) -> Result<Vec<ResolvedRecord>> {
    serde_json::from_value(payload).context("unexpected record list from daemon")
}

fn print_records(records: &[ResolvedRecord], empty: &str) {
    if records.is_empty() {
        println!("{empty}");
        return;
    }
    let rows: Vec<RecordRow> = records
        .iter()
        .map(|resolved| RecordRow {
            id: resolved.record.id.to_string(),
            created: resolved
                .record
                .created_time
                .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string()),
            fields: summarize(resolved),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    println!("{} record(s)", records.len());
}

/// Linked ids are shown by name when the daemon resolved them.
fn summarize(resolved: &ResolvedRecord) -> String {
    let joined = resolved
        .record
        .fields
        .iter()
        .filter(|(_, value)| !value.is_blank())
        .map(|(name, value)| match resolved.names.get(name) {
            Some(names) => format!("{name}: {}", names.join(", ")),
            None => format!("{name}: {value}"),
        })
        .collect::<Vec<_>>()
        .join("; ");
    if joined.chars().count() <= SUMMARY_WIDTH {
        return joined;
    }
    let mut cut: String = joined.chars().take(SUMMARY_WIDTH - 1).collect();
    cut.push('…');
    cut
}

/// Stable sort by `field`, or by id when no field is given.
fn sort_records(records: &mut [ResolvedRecord], field: Option<&str>) {
    match field {
        None => records.sort_by(|a, b| a.record.id.cmp(&b.record.id)),
        Some(name) => records.sort_by(|a, b| compare_field(sort_key(a, name), sort_key(b, name))),
    }
}

enum SortKey {
    Number(f64),
    Text(String),
}

impl SortKey {
    fn text(&self) -> String {
        match self {
            SortKey::Number(n) => n.to_string(),
            SortKey::Text(text) => text.clone(),
        }
    }
}

fn sort_key(resolved: &ResolvedRecord, field: &str) -> Option<SortKey> {
    let value = resolved.record.field(field).filter(|v| !v.is_blank())?;
    if let Some(names) = resolved.names.get(field) {
        return Some(SortKey::Text(names.join(", ").to_lowercase()));
    }
    Some(match value {
        FieldValue::Number(n) => SortKey::Number(*n),
        other => SortKey::Text(other.to_string().to_lowercase()),
    })
}

fn compare_field(a: Option<SortKey>, b: Option<SortKey>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(SortKey::Number(x)), Some(SortKey::Number(y))) => x.total_cmp(&y),
        (Some(x), Some(y)) => x.text().cmp(&y.text()),
    }
}
