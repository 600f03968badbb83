//! Fetch the authoritative state from a backend.

use anyhow::{Context, Result};
use optisync_client::{Backend, HttpBackend, SyncConfig};

/// Run the state command.
pub async fn run(config: &SyncConfig) -> Result<()> {
    let backend = HttpBackend::from_config(config).context("Failed to create HTTP client")?;

    tracing::debug!("Fetching state for '{}' from {}", config.app_name, backend.base_url());
    let state = backend
        .fetch_state()
        .await
        .with_context(|| format!("Failed to fetch state from {}", backend.base_url()))?;

    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}
