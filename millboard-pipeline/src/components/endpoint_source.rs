use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::api::{DashboardApi, QueryParams};
use crate::error::FetchError;
use crate::source::Source;
use crate::types::Endpoint;

/// Reads one endpoint of the dashboard API with fixed parameters.
pub struct EndpointSource {
    api: Arc<dyn DashboardApi>,
    endpoint: Endpoint,
    params: QueryParams,
}

impl EndpointSource {
    pub fn new(api: Arc<dyn DashboardApi>, endpoint: Endpoint) -> Self {
        Self {
            api,
            endpoint,
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }
}

#[async_trait]
impl Source for EndpointSource {
    fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    async fn fetch(&self, cancel: &CancellationToken) -> Result<Value, FetchError> {
        self.api.get_json(self.endpoint, &self.params, cancel).await
    }

    fn fallback(&self) -> Value {
        match self.endpoint {
            Endpoint::Summary => json!({}),
            _ => json!({ "data": [] }),
        }
    }

    fn name(&self) -> &str {
        self.endpoint.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_api::FakeDashboardApi;

    #[tokio::test]
    async fn forwards_params_to_api() {
        let fake = FakeDashboardApi::new();
        let source = EndpointSource::new(Arc::new(fake.clone()), Endpoint::LeadTimes)
            .with_param("page_size", 500);
        source.fetch(&CancellationToken::new()).await.unwrap();
        assert_eq!(
            fake.params(Endpoint::LeadTimes),
            vec![vec![("page_size".to_string(), "500".to_string())]]
        );
        assert_eq!(source.name(), "lead_times");
    }

    #[test]
    fn fallbacks_normalize_to_empty_collections() {
        let api: Arc<dyn DashboardApi> = Arc::new(FakeDashboardApi::new());
        for endpoint in [Endpoint::LeadTimes, Endpoint::StockStatus, Endpoint::ParallelizationPairs] {
            let fallback = EndpointSource::new(api.clone(), endpoint).fallback();
            assert!(crate::normalizer::unwrap_rows(&fallback).is_empty());
        }
        let summary = EndpointSource::new(api, Endpoint::Summary).fallback();
        assert!(crate::normalizer::normalize_summary(&summary).1.records.is_empty());
    }
}
