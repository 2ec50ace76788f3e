use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::types::Endpoint;
use crate::util;

/// One upstream collection feeding the snapshot. Sources run concurrently
/// and never see each other's results.
#[async_trait]
pub trait Source: Send + Sync {
    /// The endpoint this source reads.
    fn endpoint(&self) -> Endpoint;

    /// Fetch the raw payload.
    async fn fetch(&self, cancel: &CancellationToken) -> Result<Value, FetchError>;

    /// Payload substituted when `fetch` fails. Must normalize to an empty,
    /// structurally valid collection.
    fn fallback(&self) -> Value;

    /// Returns a stable name for logging.
    fn name(&self) -> &str {
        util::short_type_name(std::any::type_name::<Self>())
    }
}
