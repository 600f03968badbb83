//! Simulate several clients syncing through an in-process backend.

use anyhow::{bail, Context, Result};
use optisync_client::{
    ManualConnectivity, MemoryHub, MockBackend, RetryConfig, SyncClient, SyncConfig,
};
use optisync_core::MergePolicy;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::counter;

const CHANNEL: &str = "events";

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Number of clients.
    pub clients: usize,
    /// Events applied by each client.
    pub events: usize,
    /// How many clients start offline and reconnect after applying.
    pub offline: usize,
    /// Submissions the backend rejects before accepting.
    pub failures: usize,
    /// Give up waiting for convergence after this long.
    pub timeout: Duration,
}

type SimClient = SyncClient<Value, Value, MockBackend>;

/// Run the simulate command.
pub async fn run(options: &SimulateOptions) -> Result<()> {
    if options.clients == 0 {
        bail!("Need at least one client");
    }
    if options.offline > options.clients {
        bail!(
            "--offline ({}) exceeds --clients ({})",
            options.offline,
            options.clients
        );
    }

    let backend = MockBackend::with_state(json!({ "total": 0 }));
    backend.set_merge(counter::merge_json);
    backend.fail_next_submits(options.failures);
    let hub = MemoryHub::new();
    backend.connect_hub(hub.clone(), CHANNEL);

    println!(
        "Simulating {} clients x {} events ({} offline, {} injected failures)",
        options.clients, options.events, options.offline, options.failures
    );

    let mut clients: Vec<(SimClient, ManualConnectivity)> = Vec::with_capacity(options.clients);
    for i in 0..options.clients {
        let net = ManualConnectivity::new(i >= options.offline);
        let config = SyncConfig::new("simulate")
            .with_channel(CHANNEL)
            .with_client_id(&format!("client_sim{i}"))
            .with_retry(RetryConfig {
                base_delay_ms: 50,
                max_delay_ms: 400,
            })
            .with_flush_stagger(Duration::from_millis(10))
            .with_merge_definition(counter::COUNTER_DEFINITION);
        let policy: Arc<dyn MergePolicy<Value, Value>> = Arc::new(counter::merge);
        let client = SyncClient::new(config, policy, backend.clone(), hub.clone(), net.clone())
            .context("Failed to start simulated client")?;
        clients.push((client, net));
    }
    for (client, _) in &clients {
        client.ready().await;
    }

    let mut expected = 0i64;
    for round in 0..options.events {
        for (i, (client, _)) in clients.iter().enumerate() {
            let value = i64::try_from(i + 1).unwrap_or(i64::MAX);
            client.apply_event(json!({ "type": "add", "value": value, "round": round }));
            expected += value;
        }
    }

    for (client, net) in &clients {
        if !client.is_online() {
            tracing::info!("Reconnecting {}", client.client_id());
            net.set_online(true);
        }
    }

    let converged = wait_for_convergence(&clients, &backend, options.timeout).await;

    for (client, _) in &clients {
        println!(
            "{}: {} ({} pending)",
            client.client_id(),
            client.state(),
            client.pending_count()
        );
    }
    println!("backend: {}", backend.state());
    println!(
        "submissions: {} ({} accepted)",
        backend.submitted().len(),
        backend.accepted().len()
    );

    if !converged {
        bail!("Clients did not converge within {:?}", options.timeout);
    }
    let total = backend.state()["total"].as_i64().unwrap_or(0);
    if total != expected {
        bail!("Converged on total {} but expected {}", total, expected);
    }
    println!("converged: total = {}", total);
    Ok(())
}

async fn wait_for_convergence(
    clients: &[(SimClient, ManualConnectivity)],
    backend: &MockBackend,
    timeout: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let authoritative = backend.state();
        let done = clients
            .iter()
            .all(|(c, _)| c.pending_count() == 0 && c.state() == authoritative);
        if done {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
