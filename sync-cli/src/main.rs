//! # sync-cli
//!
//! CLI tool for exercising optisync clients and backends.
//!
//! ## Commands
//!
//! - `simulate`: Run several clients against an in-process backend
//! - `state`: Fetch the authoritative state from a backend
//! - `register`: Register a merge definition with a backend
//! - `apply`: Apply one event and wait for acknowledgment
//!
//! ## Example
//!
//! ```bash
//! # Three clients, one of them offline until the end
//! optisync simulate --clients 3 --events 5 --offline 1
//!
//! # Talk to a real backend
//! optisync --server http://localhost:8080 --app todo state
//! optisync --app todo register --counter
//! optisync --app todo apply '{"type": "add", "value": 5}'
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod counter;

use commands::{apply, register, simulate, state};

/// CLI tool for exercising optisync clients and backends.
#[derive(Parser, Debug)]
#[command(name = "optisync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Backend URL (overrides the config file)
    #[arg(long, global = true)]
    server: Option<String>,

    /// Application name (overrides the config file)
    #[arg(long, global = true)]
    app: Option<String>,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run several clients against an in-process backend and check convergence
    Simulate {
        /// Number of clients
        #[arg(long, default_value = "3")]
        clients: usize,

        /// Events applied by each client
        #[arg(long, default_value = "5")]
        events: usize,

        /// Clients that start offline and reconnect after applying
        #[arg(long, default_value = "0")]
        offline: usize,

        /// Submissions the backend rejects before accepting
        #[arg(long, default_value = "0")]
        failures: usize,

        /// Seconds to wait for convergence
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },

    /// Fetch the authoritative state
    State,

    /// Register a merge definition
    Register {
        /// Definition text (or use --file / --counter)
        function: Option<String>,

        /// Read the definition from a file
        #[arg(long, short, conflicts_with_all = ["function", "counter"])]
        file: Option<PathBuf>,

        /// Register the built-in counter definition
        #[arg(long, conflicts_with = "function")]
        counter: bool,
    },

    /// Apply one event and wait until the backend acknowledges it
    Apply {
        /// Event payload as JSON
        payload: String,

        /// Seconds to wait for acknowledgment
        #[arg(long, default_value = "10")]
        wait_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging (stderr, so command output stays parseable)
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Simulate {
            clients,
            events,
            offline,
            failures,
            timeout_secs,
        } => {
            simulate::run(&simulate::SimulateOptions {
                clients,
                events,
                offline,
                failures,
                timeout: Duration::from_secs(timeout_secs),
            })
            .await?;
        }
        Commands::State => {
            let config = resolve(&cli.config, &cli.server, &cli.app)?;
            state::run(&config).await?;
        }
        Commands::Register {
            function,
            file,
            counter: use_counter,
        } => {
            let config = resolve(&cli.config, &cli.server, &cli.app)?;
            let function = if let Some(text) = function {
                text
            } else if let Some(path) = file {
                tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?
            } else if use_counter {
                counter::COUNTER_DEFINITION.to_string()
            } else {
                anyhow::bail!("Must specify a definition, --file or --counter");
            };
            register::run(&config, &function).await?;
        }
        Commands::Apply { payload, wait_secs } => {
            let config = resolve(&cli.config, &cli.server, &cli.app)?;
            apply::run(config, &payload, Duration::from_secs(wait_secs)).await?;
        }
    }

    Ok(())
}

fn resolve(
    path: &Option<PathBuf>,
    server: &Option<String>,
    app: &Option<String>,
) -> Result<optisync_client::SyncConfig> {
    config::resolve(path.as_deref(), server.as_deref(), app.as_deref())
}
