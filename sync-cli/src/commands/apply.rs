//! Apply one event through a sync client and wait for acknowledgment.

use anyhow::{bail, Context, Result};
use optisync_client::{HttpBackend, ManualConnectivity, MemoryHub, SyncClient, SyncConfig};
use optisync_core::MergePolicy;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::counter;

/// Run the apply command.
pub async fn run(config: SyncConfig, payload: &str, wait: Duration) -> Result<()> {
    let payload: Value = serde_json::from_str(payload).context("Payload is not valid JSON")?;
    let backend = HttpBackend::from_config(&config).context("Failed to create HTTP client")?;
    let policy: Arc<dyn MergePolicy<Value, Value>> = Arc::new(counter::merge);

    let client = SyncClient::new(
        config,
        policy,
        backend,
        MemoryHub::new(),
        ManualConnectivity::new(true),
    )
    .context("Failed to start sync client")?;
    client.ready().await;

    let id = client.apply_event(payload);
    println!("Applied event {}", id);
    println!("Optimistic state: {}", client.state());

    let deadline = tokio::time::Instant::now() + wait;
    while client.pending_count() > 0 {
        if tokio::time::Instant::now() >= deadline {
            let attempts = client
                .pending_events()
                .first()
                .map(|e| e.retry_attempts)
                .unwrap_or(0);
            client.shutdown();
            bail!(
                "Event {} not acknowledged within {:?} ({} retries)",
                id,
                wait,
                attempts
            );
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    println!("Acknowledged");
    Ok(())
}
