//! Scriptable in-memory `DashboardApi` for tests and demos.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::api::DashboardApi;
use crate::error::FetchError;
use crate::types::Endpoint;

/// What the fake answers for one endpoint.
#[derive(Debug, Clone)]
pub enum FakeReply {
    Json(Value),
    Status(u16),
    Transport(String),
    Malformed(String),
}

#[derive(Default)]
struct FakeState {
    replies: HashMap<Endpoint, FakeReply>,
    delays: HashMap<Endpoint, Duration>,
    calls: HashMap<Endpoint, usize>,
    params: Vec<(Endpoint, Vec<(String, String)>)>,
}

/// Clones share state, so a test can keep a handle after giving one away.
#[derive(Clone)]
pub struct FakeDashboardApi {
    state: Arc<Mutex<FakeState>>,
    healthy: Arc<AtomicBool>,
}

impl Default for FakeDashboardApi {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDashboardApi {
    /// A healthy API where every data endpoint answers an empty collection.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn reply(&self, endpoint: Endpoint, reply: FakeReply) -> &Self {
        self.state().replies.insert(endpoint, reply);
        self
    }

    pub fn respond(&self, endpoint: Endpoint, body: Value) -> &Self {
        self.reply(endpoint, FakeReply::Json(body))
    }

    pub fn fail(&self, endpoint: Endpoint, status: u16) -> &Self {
        self.reply(endpoint, FakeReply::Status(status))
    }

    pub fn delay(&self, endpoint: Endpoint, delay: Duration) -> &Self {
        self.state().delays.insert(endpoint, delay);
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn calls(&self, endpoint: Endpoint) -> usize {
        self.state().calls.get(&endpoint).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state().calls.values().sum()
    }

    /// Parameters of every call to `endpoint`, oldest first.
    pub fn params(&self, endpoint: Endpoint) -> Vec<Vec<(String, String)>> {
        self.state()
            .params
            .iter()
            .filter(|(e, _)| *e == endpoint)
            .map(|(_, p)| p.clone())
            .collect()
    }

    fn answer(&self, endpoint: Endpoint) -> Result<Value, FetchError> {
        if endpoint == Endpoint::Health {
            return if self.healthy.load(Ordering::SeqCst) {
                Ok(serde_json::json!({ "status": "ok" }))
            } else {
                Err(FetchError::Transport {
                    endpoint,
                    message: "connection refused".to_string(),
                })
            };
        }
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(FetchError::Transport {
                endpoint,
                message: "connection refused".to_string(),
            });
        }
        let reply = self
            .state()
            .replies
            .get(&endpoint)
            .cloned()
            .unwrap_or_else(|| FakeReply::Json(serde_json::json!({ "data": [] })));
        match reply {
            FakeReply::Json(body) => crate::api::check_upstream_status(endpoint, body),
            FakeReply::Status(status) => Err(FetchError::Status { endpoint, status }),
            FakeReply::Transport(message) => Err(FetchError::Transport { endpoint, message }),
            FakeReply::Malformed(message) => Err(FetchError::MalformedBody { endpoint, message }),
        }
    }
}

#[async_trait]
impl DashboardApi for FakeDashboardApi {
    async fn get_json(
        &self,
        endpoint: Endpoint,
        params: &[(String, String)],
        cancel: &CancellationToken,
    ) -> Result<Value, FetchError> {
        let delay = {
            let mut state = self.state();
            *state.calls.entry(endpoint).or_insert(0) += 1;
            state.params.push((endpoint, params.to_vec()));
            state.delays.get(&endpoint).copied()
        };
        if let Some(delay) = delay {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled { endpoint }),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled { endpoint });
        }
        self.answer(endpoint)
    }
}
