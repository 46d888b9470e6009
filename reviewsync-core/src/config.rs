//! YAML configuration at `~/.reviewsync/config.yaml`.
//!
//! # API pattern
//!
//! Every function touching disk has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::scope::ScopeRules;

pub const DEFAULT_BASE_URL: &str = "https://api.airtable.com/v0";
pub const DEFAULT_TOKEN_ENV: &str = "REVIEWSYNC_TOKEN";

// ---------------------------------------------------------------------------
// 1. Types
// ---------------------------------------------------------------------------

/// Root of the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub remote: RemoteConfig,
    #[serde(default)]
    pub scope: ScopeRules,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub board: BoardConfig,
}

/// Where the authoritative table lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub base_id: String,
    pub table_id: String,
    /// View used for the initial full fetch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,
    /// Name of the environment variable holding the API token. The token
    /// itself is never written to disk.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl RemoteConfig {
    pub fn new(base_id: impl Into<String>, table_id: impl Into<String>) -> Self {
        Self {
            base_url: default_base_url(),
            base_id: base_id.into(),
            table_id: table_id.into(),
            view: None,
            token_env: default_token_env(),
            page_size: default_page_size(),
        }
    }
}

/// Timing knobs for the reconciliation schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Checkpoints are regressed by this much to catch near-boundary writes.
    #[serde(default = "default_overlap_secs")]
    pub overlap_secs: u64,
    /// Delay before the first poll after start and after every resume.
    #[serde(default = "default_first_run_delay_ms")]
    pub first_run_delay_ms: u64,
}

impl SyncSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn overlap(&self) -> Duration {
        Duration::from_secs(self.overlap_secs)
    }

    pub fn first_run_delay(&self) -> Duration {
        Duration::from_millis(self.first_run_delay_ms)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            overlap_secs: default_overlap_secs(),
            first_run_delay_ms: default_first_run_delay_ms(),
        }
    }
}

/// How linked record ids are shown, and which fields the board filters on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardConfig {
    #[serde(default)]
    pub links: Vec<LinkedTable>,
    /// Fields naming the technician. The first non-blank one is used.
    #[serde(default = "default_tech_fields")]
    pub tech_fields: Vec<String>,
    /// Fields naming the branch. The first non-blank one is used.
    #[serde(default = "default_branch_fields")]
    pub branch_fields: Vec<String>,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            links: Vec::new(),
            tech_fields: default_tech_fields(),
            branch_fields: default_branch_fields(),
        }
    }
}

/// A table that review records link into, e.g. customers or technicians.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedTable {
    pub table_id: String,
    /// Link fields on review records that point at this table.
    pub fields: Vec<String>,
    /// Fields holding a record's display name, in priority order.
    #[serde(default = "default_name_fields")]
    pub name_fields: Vec<String>,
}

impl LinkedTable {
    pub fn new(table_id: impl Into<String>, fields: &[&str], name_fields: &[&str]) -> Self {
        Self {
            table_id: table_id.into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            name_fields: name_fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

impl Config {
    /// Reject values that would make the engine spin or never poll.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.remote.base_id.trim().is_empty() || self.remote.table_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "remote.base_id and remote.table_id must be set".to_string(),
            ));
        }
        if self.remote.page_size == 0 || self.remote.page_size > 100 {
            return Err(ConfigError::Invalid(format!(
                "remote.page_size must be between 1 and 100, got {}",
                self.remote.page_size
            )));
        }
        if self.sync.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sync.poll_interval_secs must be greater than zero".to_string(),
            ));
        }
        for link in &self.board.links {
            if link.table_id.trim().is_empty() || link.fields.is_empty() {
                return Err(ConfigError::Invalid(
                    "board.links entries need a table_id and at least one field".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_token_env() -> String {
    DEFAULT_TOKEN_ENV.to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_poll_interval_secs() -> u64 {
    15 * 60
}

fn default_overlap_secs() -> u64 {
    30
}

fn default_first_run_delay_ms() -> u64 {
    1500
}

fn default_tech_fields() -> Vec<String> {
    vec!["Tech name".to_string(), "Field Technician".to_string()]
}

fn default_branch_fields() -> Vec<String> {
    vec!["Vanir Branch".to_string()]
}

fn default_name_fields() -> Vec<String> {
    vec!["Name".to_string()]
}

// ---------------------------------------------------------------------------
// 2. Paths
// ---------------------------------------------------------------------------

/// `<home>/.reviewsync/`
pub fn root_at(home: &Path) -> PathBuf {
    home.join(".reviewsync")
}

/// `<home>/.reviewsync/config.yaml`. Pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    root_at(home).join("config.yaml")
}

// ---------------------------------------------------------------------------
// 3. Load / save
// ---------------------------------------------------------------------------

/// Load and validate the config.
///
/// Returns `ConfigError::NotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(ConfigError::NotFound { path });
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let config: Config =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })?;
    config.validate()?;
    Ok(config)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, ConfigError> {
    load_at(&home()?)
}

/// Save the config atomically (`.tmp` + rename, mode 0600).
pub fn save_at(home: &Path, config: &Config) -> Result<PathBuf, ConfigError> {
    let root = root_at(home);
    if !root.exists() {
        std::fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
        set_dir_permissions(&root)?;
    }

    let path = config_path_at(home);
    let yaml = serde_yaml::to_string(config)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&path, e));
    }
    Ok(path)
}

/// `save_at` convenience wrapper.
pub fn save(config: &Config) -> Result<PathBuf, ConfigError> {
    save_at(&home()?, config)
}

/// Home directory, or `ConfigError::HomeNotFound`.
pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}
