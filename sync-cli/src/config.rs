//! Configuration resolution for the optisync CLI.
//!
//! A TOML file (`--config`) is loaded first; `--server` and `--app` override
//! its values. Without a file, `--app` is required.

use anyhow::{Context, Result};
use optisync_client::SyncConfig;
use std::path::Path;

/// Build the client configuration from the global CLI options.
pub fn resolve(config: Option<&Path>, server: Option<&str>, app: Option<&str>) -> Result<SyncConfig> {
    let mut resolved = match config {
        Some(path) => SyncConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            let app = app.context("No application name. Pass --app or --config.")?;
            SyncConfig::new(app)
        }
    };

    if let Some(app) = app {
        resolved.app_name = app.to_string();
    }
    if let Some(server) = server {
        resolved.server_url = server.to_string();
    }

    resolved.validate().context("Invalid configuration")?;
    Ok(resolved)
}
