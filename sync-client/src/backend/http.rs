//! HTTP backend over reqwest.

use super::{Backend, BackendError};
use crate::config::SyncConfig;
use async_trait::async_trait;
use optisync_types::MergeDefinition;
use serde_json::Value;
use std::time::Duration;

/// Header naming the application namespace on every request.
pub const APPLICATION_NAME_HEADER: &str = "Application-Name";

/// REST backend reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: String,
    app_name: String,
    client: reqwest::Client,
}

impl HttpBackend {
    /// Create a backend for `base_url` in the `app_name` namespace.
    pub fn new(base_url: &str, app_name: &str, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BackendError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            app_name: app_name.to_string(),
            client,
        })
    }

    /// Create a backend from client configuration.
    pub fn from_config(config: &SyncConfig) -> Result<Self, BackendError> {
        Self::new(&config.server_url, &config.app_name, config.request_timeout())
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, BackendError> {
        let response = request
            .header(APPLICATION_NAME_HEADER, &self.app_name)
            .send()
            .await
            .map_err(|e| BackendError::Network(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_state(&self) -> Result<Value, BackendError> {
        let response = self.send(self.client.get(self.url("/state"))).await?;
        response
            .json()
            .await
            .map_err(|e| BackendError::Decode(format!("failed to parse state: {}", e)))
    }

    async fn register_merge(&self, definition: &MergeDefinition) -> Result<(), BackendError> {
        self.send(self.client.post(self.url("/merge_func")).json(definition))
            .await?;
        Ok(())
    }

    async fn submit_event(&self, event: &Value) -> Result<(), BackendError> {
        self.send(self.client.post(self.url("/event")).json(event))
            .await?;
        Ok(())
    }
}
