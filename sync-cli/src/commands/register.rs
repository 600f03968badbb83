//! Register a merge definition with a backend.

use anyhow::{Context, Result};
use optisync_client::{Backend, HttpBackend, SyncConfig};
use optisync_types::MergeDefinition;

/// Run the register command.
pub async fn run(config: &SyncConfig, function: &str) -> Result<()> {
    let definition = MergeDefinition::new(function).context("Invalid merge definition")?;
    let backend = HttpBackend::from_config(config).context("Failed to create HTTP client")?;

    backend
        .register_merge(&definition)
        .await
        .with_context(|| format!("Failed to register merge definition with {}", backend.base_url()))?;

    println!(
        "Registered merge definition ({} bytes) for '{}'",
        definition.as_str().len(),
        config.app_name
    );
    Ok(())
}
