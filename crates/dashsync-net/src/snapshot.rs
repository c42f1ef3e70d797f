//! Concurrent full-state fetch that seeds the view model.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use dashsync_config::{derive_endpoint_name, SnapshotConfig, SnapshotEndpointConfig, SnapshotTarget};
use dashsync_core::{SharedMetrics, SnapshotSource, StateMerger, SyncError};

/// An endpoint with its name resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEndpoint {
    pub name: String,
    pub path: String,
    pub target: SnapshotTarget,
}

impl From<&SnapshotEndpointConfig> for SnapshotEndpoint {
    fn from(config: &SnapshotEndpointConfig) -> Self {
        let name = match config.name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => derive_endpoint_name(&config.path),
        };
        SnapshotEndpoint {
            name,
            path: config.path.clone(),
            target: config.target.clone(),
        }
    }
}

/// Outcome of one `fetch_initial` run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotReport {
    /// Endpoint names in completion order.
    pub loaded: Vec<String>,
    /// `(endpoint, reason)` in completion order.
    pub failed: Vec<(String, String)>,
}

impl SnapshotReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Fan-out/fan-in initial fetch.
///
/// Every endpoint is requested concurrently and applied as soon as it
/// resolves. A failed endpoint leaves its keys untouched, does not affect
/// its siblings, and produces exactly one synthetic error entry.
pub struct SnapshotLoader {
    endpoints: Vec<SnapshotEndpoint>,
    source: Arc<dyn SnapshotSource>,
    timeout: Duration,
    metrics: SharedMetrics,
}

impl SnapshotLoader {
    pub fn new(
        endpoints: Vec<SnapshotEndpoint>,
        source: Arc<dyn SnapshotSource>,
        timeout: Duration,
        metrics: SharedMetrics,
    ) -> Self {
        SnapshotLoader {
            endpoints,
            source,
            timeout,
            metrics,
        }
    }

    pub fn from_config(
        config: &SnapshotConfig,
        source: Arc<dyn SnapshotSource>,
        metrics: SharedMetrics,
    ) -> Self {
        SnapshotLoader::new(
            config.endpoints.iter().map(SnapshotEndpoint::from).collect(),
            source,
            config.timeout.as_duration(),
            metrics,
        )
    }

    pub fn endpoints(&self) -> &[SnapshotEndpoint] {
        &self.endpoints
    }

    /// Fetch every endpoint once. Never retries.
    pub async fn fetch_initial(&self, merger: &RwLock<StateMerger>) -> SnapshotReport {
        let mut in_flight: FuturesUnordered<_> = self
            .endpoints
            .iter()
            .map(|endpoint| async move {
                let result = self.fetch_one(endpoint).await;
                (endpoint, result)
            })
            .collect();

        let mut report = SnapshotReport::default();
        while let Some((endpoint, result)) = in_flight.next().await {
            let mut state = merger.write().await;
            let applied =
                result.and_then(|data| state.apply_snapshot(&endpoint.name, &endpoint.target, data));

            match applied {
                Ok(written) => {
                    self.metrics.record_snapshot_loaded();
                    debug!(endpoint = %endpoint.name, written, "snapshot endpoint applied");
                    report.loaded.push(endpoint.name.clone());
                }
                Err(e) => {
                    self.metrics.record_snapshot_failed();
                    let reason = failure_reason(&e);
                    state.record_snapshot_failure(&endpoint.name, &reason);
                    report.failed.push((endpoint.name.clone(), reason));
                }
            }
        }

        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "snapshot fetch finished"
        );
        report
    }

    async fn fetch_one(&self, endpoint: &SnapshotEndpoint) -> Result<Value, SyncError> {
        match tokio::time::timeout(self.timeout, self.source.fetch(&endpoint.name, &endpoint.path))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout {
                operation: format!("snapshot {}", endpoint.name),
                millis: self.timeout.as_millis() as u64,
            }),
        }
    }
}

fn failure_reason(e: &SyncError) -> String {
    match e {
        SyncError::SnapshotFetch { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error: Option<String>,
}

impl Envelope {
    fn into_data(self, endpoint: &str) -> Result<Value, SyncError> {
        if self.success {
            Ok(self.data)
        } else {
            Err(SyncError::SnapshotFetch {
                endpoint: endpoint.to_string(),
                reason: self
                    .error
                    .unwrap_or_else(|| "request was not successful".to_string()),
            })
        }
    }
}

/// Snapshot source backed by the REST surface.
///
/// Each endpoint answers `{success, data, error?}`.
pub struct HttpSnapshotSource {
    client: Client,
    base_url: String,
}

impl HttpSnapshotSource {
    pub fn new(
        base_url: &str,
        bearer_token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let mut client_builder = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)));

        if let Some(token) = bearer_token {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| SyncError::Config(format!("Invalid bearer token: {}", e)))?,
            );
            client_builder = client_builder.default_headers(headers);
        }

        let client = client_builder
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(HttpSnapshotSource {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &SnapshotConfig) -> Result<Self, SyncError> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| SyncError::Config("snapshot.base_url is not set".to_string()))?;
        HttpSnapshotSource::new(
            base_url,
            config.bearer_token.as_deref(),
            config.timeout.as_duration(),
        )
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self, endpoint: &str, path: &str) -> Result<Value, SyncError> {
        let failed = |reason: String| SyncError::SnapshotFetch {
            endpoint: endpoint.to_string(),
            reason,
        };

        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .map_err(|e| failed(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(failed(format!("HTTP {}: {}", status, body.trim())));
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| failed(format!("invalid response body: {}", e)))?;
        envelope.into_data(endpoint)
    }
}

/// Canned responses keyed by path.
#[derive(Default)]
pub struct MemorySnapshotSource {
    responses: Mutex<HashMap<String, Result<Value, String>>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<String>>,
}

impl MemorySnapshotSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `path` with a successful envelope carrying `data`.
    pub fn respond(&self, path: &str, data: Value) {
        self.responses.lock().insert(path.to_string(), Ok(data));
    }

    /// Answer `path` with a failure.
    pub fn fail(&self, path: &str, reason: &str) {
        self.responses
            .lock()
            .insert(path.to_string(), Err(reason.to_string()));
    }

    /// Delay the answer for `path`.
    pub fn delay(&self, path: &str, delay: Duration) {
        self.delays.lock().insert(path.to_string(), delay);
    }

    /// Paths requested so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl SnapshotSource for MemorySnapshotSource {
    async fn fetch(&self, endpoint: &str, path: &str) -> Result<Value, SyncError> {
        self.calls.lock().push(path.to_string());
        let delay = self.delays.lock().get(path).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let response = self.responses.lock().get(path).cloned();
        match response {
            Some(Ok(data)) => Ok(data),
            Some(Err(reason)) => Err(SyncError::SnapshotFetch {
                endpoint: endpoint.to_string(),
                reason,
            }),
            None => Err(SyncError::SnapshotFetch {
                endpoint: endpoint.to_string(),
                reason: "HTTP 404 Not Found".to_string(),
            }),
        }
    }
}
