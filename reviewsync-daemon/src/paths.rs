use std::path::{Path, PathBuf};

pub const DAEMON_SOCKET: &str = "daemon.sock";

/// Environment switch for JSON log lines (`REVIEWSYNC_LOG_FORMAT=json`).
pub const LOG_FORMAT_ENV: &str = "REVIEWSYNC_LOG_FORMAT";

pub fn reviewsync_root(home: &Path) -> PathBuf {
    reviewsync_core::config::root_at(home)
}

pub fn socket_path(home: &Path) -> PathBuf {
    reviewsync_root(home).join(DAEMON_SOCKET)
}
