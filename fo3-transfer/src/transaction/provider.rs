//! Transaction provider endpoints and bounded network calls

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// API dialect spoken by an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// Esplora REST API (Blockstream, mempool.space)
    Esplora,
    /// BlockCypher REST API
    BlockCypher,
    /// JSON-RPC 2.0 node endpoint
    JsonRpc,
}

/// Provider endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Name used in logs and error messages
    pub name: String,
    /// Provider URL
    pub url: String,
    /// API dialect
    pub kind: ProviderKind,
    /// Timeout in milliseconds
    pub timeout_ms: u64,
    /// Lower values are tried first
    #[serde(default)]
    pub priority: u32,
    /// API token (if required)
    #[serde(default)]
    pub api_token: Option<String>,
}

impl EndpointConfig {
    /// Create an endpoint with default priority and no token
    pub fn new(name: &str, kind: ProviderKind, url: &str, timeout_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            url: url.trim_end_matches('/').to_string(),
            kind,
            timeout_ms,
            priority: 0,
            api_token: None,
        }
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Join a path onto the base URL
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

/// Endpoints sorted by priority, preserving configured order among equals
pub fn ordered(endpoints: &[EndpointConfig]) -> Vec<&EndpointConfig> {
    let mut sorted: Vec<&EndpointConfig> = endpoints.iter().collect();
    sorted.sort_by_key(|endpoint| endpoint.priority);
    sorted
}

/// Run a network future under a hard deadline.
///
/// Expiry yields [`Error::Timeout`], never a network error, so callers can
/// branch on the kind.
pub async fn bounded<T, F>(operation: &str, timeout: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            operation: operation.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Shared HTTP client; per-call deadlines come from [`bounded`]
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("fo3-transfer/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))
}

/// Turn a non-success HTTP status into a network error, keeping the body
pub async fn ensure_success(provider: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(Error::Network(format!("{} rate limited the request", provider)));
    }
    Err(Error::Network(format!("{} returned HTTP {}: {}", provider, status.as_u16(), body.trim())))
}

/// Issue one JSON-RPC 2.0 call and return its `result`.
///
/// No deadline is applied here; wrap the call in [`bounded`].
pub async fn json_rpc(
    client: &reqwest::Client,
    endpoint: &EndpointConfig,
    method: &str,
    params: serde_json::Value,
) -> Result<serde_json::Value> {
    let payload = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    });

    let response = client.post(&endpoint.url).json(&payload).send().await?;
    let mut body: serde_json::Value = ensure_success(&endpoint.name, response).await?.json().await?;

    if let Some(error) = body.get("error").filter(|error| !error.is_null()) {
        return Err(Error::Network(format!("{} {} error: {}", endpoint.name, method, error)));
    }

    match body.get_mut("result").map(serde_json::Value::take) {
        Some(result) => Ok(result),
        None => Err(Error::Network(format!("{} {} response has no result", endpoint.name, method))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_by_priority() {
        let endpoints = vec![
            EndpointConfig::new("secondary", ProviderKind::BlockCypher, "https://b", 12_000).with_priority(1),
            EndpointConfig::new("primary", ProviderKind::Esplora, "https://a/", 8_000),
            EndpointConfig::new("tertiary", ProviderKind::Esplora, "https://c", 8_000).with_priority(1),
        ];

        let names: Vec<&str> = ordered(&endpoints).iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["primary", "secondary", "tertiary"]);
        assert_eq!(endpoints[1].endpoint("/address/x/utxo"), "https://a/address/x/utxo");
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: Result<()> = bounded("slow call", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(Error::Timeout { operation, timeout_ms }) => {
                assert_eq!(operation, "slow call");
                assert_eq!(timeout_ms, 10);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bounded_passes_through() {
        let value = bounded("fast call", Duration::from_secs(1), async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);

        let err = bounded::<(), _>("failing call", Duration::from_secs(1), async {
            Err(Error::Network("HTTP 500".to_string()))
        })
        .await
        .unwrap_err();
        assert!(!err.is_timeout());
    }
}
