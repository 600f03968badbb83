//! Configuration for SyncClient.
//!
//! Built in code with the builder methods, or loaded from a TOML file:
//!
//! ```toml
//! app_name = "todo"
//! server_url = "https://sync.example.com"
//! channel = "events"
//! flush_stagger_ms = 100
//!
//! [retry]
//! base_delay_ms = 1000
//! max_delay_ms = 30000
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use optisync_core::RetryPolicy;

/// Configuration for SyncClient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Application namespace, sent as the `Application-Name` header.
    pub app_name: String,
    /// Base URL of the REST backend.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Realtime channel name.
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Fixed client id (random when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Retry backoff settings.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Gap between submissions when flushing the queue (milliseconds).
    #[serde(default = "default_flush_stagger_ms")]
    pub flush_stagger_ms: u64,
    /// Per-request timeout for the HTTP backend (seconds).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Serialized merge policy registered with the backend on startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_definition: Option<String>,
}

/// Retry backoff settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry (milliseconds).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for any retry delay (milliseconds).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl RetryConfig {
    /// The backoff policy described by this configuration.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

// Default value functions
fn default_server_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_channel() -> String {
    "events".to_string()
}

fn default_flush_stagger_ms() -> u64 {
    100
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl SyncConfig {
    /// Create a configuration for the given application namespace.
    pub fn new(app_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            server_url: default_server_url(),
            channel: default_channel(),
            client_id: None,
            retry: RetryConfig::default(),
            flush_stagger_ms: default_flush_stagger_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            merge_definition: None,
        }
    }

    /// Set the backend URL.
    pub fn with_server_url(mut self, url: &str) -> Self {
        self.server_url = url.to_string();
        self
    }

    /// Set the realtime channel name.
    pub fn with_channel(mut self, channel: &str) -> Self {
        self.channel = channel.to_string();
        self
    }

    /// Use a fixed client id instead of a random one.
    pub fn with_client_id(mut self, client_id: &str) -> Self {
        self.client_id = Some(client_id.to_string());
        self
    }

    /// Set the retry backoff.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the gap between submissions when flushing.
    pub fn with_flush_stagger(mut self, stagger: Duration) -> Self {
        self.flush_stagger_ms = u64::try_from(stagger.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the HTTP request timeout, rounded up to whole seconds.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        let partial = u64::from(timeout.subsec_nanos() > 0);
        self.request_timeout_secs = timeout.as_secs().saturating_add(partial);
        self
    }

    /// Register this merge definition with the backend on startup.
    pub fn with_merge_definition(mut self, definition: &str) -> Self {
        self.merge_definition = Some(definition.to_string());
        self
    }

    /// Flush stagger as a duration.
    pub fn flush_stagger(&self) -> Duration {
        Duration::from_millis(self.flush_stagger_ms)
    }

    /// Request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Check the configuration for values the client cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_name.trim().is_empty() {
            return Err(ConfigError::Invalid("app_name must not be empty".into()));
        }
        if self.channel.trim().is_empty() {
            return Err(ConfigError::Invalid("channel must not be empty".into()));
        }
        if self.retry.base_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "retry.base_delay_ms must be positive".into(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::InvalidToml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Failed to parse configuration text.
    #[error("failed to parse config: {0}")]
    InvalidToml(#[source] toml::de::Error),
    /// Parsed but unusable values.
    #[error("invalid config: {0}")]
    Invalid(String),
}
