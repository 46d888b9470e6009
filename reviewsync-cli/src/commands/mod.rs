pub mod daemon;
pub mod init;
pub mod list;
pub mod load;
pub mod save;
pub mod schedule;
pub mod status;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use reviewsync_daemon::DaemonError;

pub(crate) fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Turn a socket call result into a CLI error. A missing daemon gets a hint
/// instead of the raw socket path.
pub(crate) fn daemon_call<T>(result: Result<T, DaemonError>, action: &str) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(DaemonError::DaemonNotRunning { .. }) => {
            bail!("daemon is not running; start it with `reviewsync daemon start`")
        }
        Err(err) => Err(err).with_context(|| format!("failed to {action}")),
    }
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render JSON")?;
    println!("{rendered}");
    Ok(())
}
