//! Runtime stats providers
//!
//! The engine only needs `fetch_stats(entity_id)`. The HTTP provider talks
//! to a Docker-compatible API endpoint; tests and alternative runtimes can
//! plug in their own [`StatsProvider`].

use super::{ContainerStats, StatsPayload};
use crate::error::{MeterError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Default environment variable naming the monitored container
pub const DEFAULT_ENTITY_ID_VAR: &str = "HOSTNAME";

/// Source of runtime stats snapshots
#[async_trait]
pub trait StatsProvider: Send + Sync {
    /// Confirm the entity exists; `EntityNotFound` disables the runtime path
    async fn locate(&self, entity_id: &str) -> Result<()>;

    /// Fetch one stats snapshot for the entity
    async fn fetch_stats(&self, entity_id: &str) -> Result<ContainerStats>;
}

/// Resolve the entity id from the environment variable `var`
pub fn entity_id_from_env(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(id) if !id.trim().is_empty() => Ok(id.trim().to_string()),
        _ => Err(MeterError::EntityIdMissing {
            var: var.to_string(),
        }),
    }
}

/// Stats provider over a Docker-compatible HTTP API
pub struct HttpStatsProvider {
    client: Client,
    base_url: Url,
    request_timeout: Duration,
}

impl HttpStatsProvider {
    /// Create a provider for `endpoint`, e.g. `http://localhost:2375`
    pub fn new(endpoint: &str, request_timeout: Duration) -> Result<Self> {
        let invalid = |reason: String| MeterError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason,
        };

        let mut base_url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(invalid("endpoint cannot be used as a base URL".into()));
        }
        // Url::join replaces the last segment unless the path ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            request_timeout,
        })
    }

    fn container_url(&self, entity_id: &str, resource: &str) -> Result<Url> {
        self.base_url
            .join(&format!("containers/{}/{}", entity_id, resource))
            .map_err(|e| MeterError::FetchFailed {
                reason: format!("invalid request path for '{}': {}", entity_id, e),
            })
    }

    async fn get(&self, entity_id: &str, url: Url) -> Result<reqwest::Response> {
        debug!(url = %url, "Requesting runtime API");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MeterError::from_request(e, self.request_timeout))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(MeterError::EntityNotFound {
                id: entity_id.to_string(),
            }),
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                Err(MeterError::FetchFailed {
                    reason: format!("runtime API error ({}): {}", status, body.trim()),
                })
            }
            _ => Ok(response),
        }
    }
}

#[async_trait]
impl StatsProvider for HttpStatsProvider {
    async fn locate(&self, entity_id: &str) -> Result<()> {
        let url = self.container_url(entity_id, "json")?;
        self.get(entity_id, url).await.map(|_| ())
    }

    async fn fetch_stats(&self, entity_id: &str) -> Result<ContainerStats> {
        let mut url = self.container_url(entity_id, "stats")?;
        url.query_pairs_mut().append_pair("stream", "false");

        let payload: StatsPayload = self
            .get(entity_id, url)
            .await?
            .json()
            .await
            .map_err(|e| MeterError::from_request(e, self.request_timeout))?;
        payload.into_first().ok_or_else(|| MeterError::FetchFailed {
            reason: "runtime returned an empty stats list".into(),
        })
    }
}
