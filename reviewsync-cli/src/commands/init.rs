//! `reviewsync init --base-id <id> --table-id <id> [--view ...] [--force]`

use anyhow::{bail, Context, Result};
use clap::Args;

use reviewsync_core::config::{self, DEFAULT_BASE_URL, DEFAULT_TOKEN_ENV};
use reviewsync_core::{Config, ConfigError, RemoteConfig};

use super::home_dir;

/// Write the config for a remote table.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Remote base identifier (e.g. "appXXXXXXXXXXXXXX").
    #[arg(long)]
    pub base_id: String,

    /// Table identifier or name within the base.
    #[arg(long)]
    pub table_id: String,

    /// View used for the initial full fetch.
    #[arg(long)]
    pub view: Option<String>,

    /// API root.
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Environment variable the daemon reads the API token from.
    #[arg(long, value_name = "VAR", default_value = DEFAULT_TOKEN_ENV)]
    pub token_env: String,

    /// Overwrite an existing config. Scope, sync and board settings are kept.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let path = config::config_path_at(&home);

        let (scope, sync, board) = match config::load_at(&home) {
            Ok(_) if !self.force => bail!(
                "config already exists at {}; pass --force to overwrite",
                path.display()
            ),
            Ok(existing) => (existing.scope, existing.sync, existing.board),
            Err(ConfigError::NotFound { .. }) => Default::default(),
            Err(_) if self.force => Default::default(),
            Err(err) => {
                return Err(err).context("existing config is unreadable; pass --force to replace it")
            }
        };

        let mut remote = RemoteConfig::new(self.base_id, self.table_id);
        remote.view = self.view;
        remote.base_url = self.base_url;
        remote.token_env = self.token_env;
        let config = Config {
            remote,
            scope,
            sync,
            board,
        };
        config.validate().context("invalid config")?;

        let written = config::save_at(&home, &config)
            .with_context(|| format!("failed to write {}", path.display()))?;

        println!(
            "✓ Configured table '{}' in base '{}'",
            config.remote.table_id, config.remote.base_id
        );
        println!("  Saved to: {}", written.display());
        println!(
            "  Export {} with an API token, then run `reviewsync daemon start`",
            config.remote.token_env
        );
        Ok(())
    }
}
