//! `reviewsync save <id> --set field=value...`

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use serde_json::{Map, Number, Value};

use reviewsync_core::Record;
use reviewsync_daemon::request_save;

use super::{daemon_call, home_dir, print_json};

/// Save field changes to one record.
#[derive(Args, Debug)]
pub struct SaveArgs {
    /// Record identity.
    pub id: String,

    /// `field=value`. Numbers stay numeric, `[recA,recB]` is a link list and
    /// an empty value clears the field. Repeat for several fields.
    #[arg(long = "set", value_name = "FIELD=VALUE", required = true)]
    pub set: Vec<String>,

    /// Emit the daemon response as JSON.
    #[arg(long)]
    pub json: bool,
}

impl SaveArgs {
    pub fn run(self) -> Result<()> {
        let fields = parse_assignments(&self.set)?;
        let names: Vec<String> = fields.keys().cloned().collect();

        let home = home_dir()?;
        let response = daemon_call(request_save(&home, &self.id, fields), "save record")?;
        if self.json {
            print_json(&response)?;
        }

        let data = response.data.unwrap_or(Value::Null);
        if response.ok {
            if !self.json {
                match data.get("outcome").and_then(Value::as_str) {
                    Some("superseded") => {
                        println!("save of '{}' was superseded by a newer save", self.id)
                    }
                    _ => println!("{} saved '{}'", "✓".green(), self.id),
                }
            }
            return Ok(());
        }

        let message = response
            .error
            .unwrap_or_else(|| "unknown daemon error".to_string());
        if !self.json {
            print_revert(&self.id, &names, data.get("last_good"));
        }
        bail!("save of '{}' rejected: {message}", self.id)
    }
}

/// Print the last confirmed values of the fields the rejected save touched.
fn print_revert(id: &str, names: &[String], last_good: Option<&Value>) {
    let record = last_good
        .cloned()
        .and_then(|v| serde_json::from_value::<Record>(v).ok());
    let Some(record) = record else {
        eprintln!("{} no confirmed copy of '{id}' to revert to", "!".yellow());
        return;
    };
    eprintln!("Last confirmed values for '{id}':");
    for name in names {
        let shown = record
            .field(name)
            .filter(|v| !v.is_blank())
            .map(|v| v.to_string())
            .unwrap_or_else(|| "(blank)".bright_black().to_string());
        eprintln!("  {name} = {shown}");
    }
}

/// Parse every `--set` into one wire field map. Later assignments to the
/// same field win.
pub(crate) fn parse_assignments(raw: &[String]) -> Result<Map<String, Value>> {
    let mut fields = Map::new();
    for assignment in raw {
        let (name, value) = parse_assignment(assignment)?;
        fields.insert(name, value);
    }
    Ok(fields)
}

fn parse_assignment(raw: &str) -> Result<(String, Value)> {
    let Some((name, value)) = raw.split_once('=') else {
        bail!("expected FIELD=VALUE, got '{raw}'");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("field name is empty in '{raw}'");
    }
    Ok((name.to_string(), parse_value(value)))
}

/// Non-finite numbers such as `NaN` stay text.
fn parse_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Some(inner) = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    {
        let ids: Vec<Value> = inner
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| Value::String(id.to_string()))
            .collect();
        return Value::Array(ids);
    }
    if let Some(number) = trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(number);
    }
    Value::String(raw.to_string())
}
