use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::types::Endpoint;

/// Query parameters for one call, already rendered to strings.
pub type QueryParams = Vec<(String, String)>;

/// The remote dashboard API. One call per logical endpoint, each independently
/// fallible and bounded by `cancel`.
#[async_trait]
pub trait DashboardApi: Send + Sync {
    async fn get_json(
        &self,
        endpoint: Endpoint,
        params: &[(String, String)],
        cancel: &CancellationToken,
    ) -> Result<Value, FetchError>;

    /// Liveness probe issued before a full refresh.
    async fn probe(&self, cancel: &CancellationToken) -> Result<(), FetchError> {
        self.get_json(Endpoint::Health, &[], cancel).await.map(|_| ())
    }
}

/// `reqwest`-backed client for the live API.
#[derive(Clone)]
pub struct HttpDashboardApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDashboardApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, endpoint: Endpoint) -> String {
        format!("{}/{}", self.base_url, endpoint.path())
    }

    async fn fetch(&self, endpoint: Endpoint, params: &[(String, String)]) -> Result<Value, FetchError> {
        let resp = self
            .client
            .get(self.url(endpoint))
            .query(params)
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                endpoint,
                message: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return Err(FetchError::Status {
                endpoint,
                status: resp.status().as_u16(),
            });
        }
        let bytes = resp.bytes().await.map_err(|e| FetchError::Transport {
            endpoint,
            message: format!("read body failed: {e}"),
        })?;
        let body: Value = serde_json::from_slice(&bytes).map_err(|e| FetchError::MalformedBody {
            endpoint,
            message: e.to_string(),
        })?;
        check_upstream_status(endpoint, body)
    }
}

/// A 2xx body of `{"status": "error", ...}` is still a failure.
pub fn check_upstream_status(endpoint: Endpoint, body: Value) -> Result<Value, FetchError> {
    let is_error = body
        .get("status")
        .and_then(Value::as_str)
        .map(|s| s.eq_ignore_ascii_case("error"))
        .unwrap_or(false);
    if is_error {
        let message = body
            .get("error")
            .or_else(|| body.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("server returned error status")
            .to_string();
        return Err(FetchError::Upstream { endpoint, message });
    }
    Ok(body)
}

#[async_trait]
impl DashboardApi for HttpDashboardApi {
    async fn get_json(
        &self,
        endpoint: Endpoint,
        params: &[(String, String)],
        cancel: &CancellationToken,
    ) -> Result<Value, FetchError> {
        log::debug!("GET {} params={:?}", self.url(endpoint), params);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled { endpoint }),
            result = self.fetch(endpoint, params) => result,
        }
    }
}
