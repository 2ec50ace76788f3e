use thiserror::Error;

use crate::types::Endpoint;

/// Failure of a single upstream call.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error on {endpoint}: {message}")]
    Transport { endpoint: Endpoint, message: String },

    #[error("{endpoint} answered with HTTP {status}")]
    Status { endpoint: Endpoint, status: u16 },

    #[error("malformed body from {endpoint}: {message}")]
    MalformedBody { endpoint: Endpoint, message: String },

    #[error("{endpoint} reported an upstream error: {message}")]
    Upstream { endpoint: Endpoint, message: String },

    #[error("request to {endpoint} was cancelled")]
    Cancelled { endpoint: Endpoint },
}

impl FetchError {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            FetchError::Transport { endpoint, .. }
            | FetchError::Status { endpoint, .. }
            | FetchError::MalformedBody { endpoint, .. }
            | FetchError::Upstream { endpoint, .. }
            | FetchError::Cancelled { endpoint } => *endpoint,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled { .. })
    }
}

/// Failure of a whole refresh cycle.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("dashboard API unreachable: {0}")]
    Unreachable(String),

    #[error("every data endpoint failed ({0} endpoints)")]
    AllEndpointsFailed(usize),

    #[error("refresh cancelled")]
    Cancelled,

    #[error("pipeline has not completed processing")]
    NotReady,

    #[error("cannot {action} while {phase}")]
    InvalidTransition { action: String, phase: String },

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

impl RefreshError {
    /// True for the failures that mean no fresh data could be obtained at all.
    pub fn is_total_failure(&self) -> bool {
        matches!(
            self,
            RefreshError::Unreachable(_) | RefreshError::AllEndpointsFailed(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cache serialization error on {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}
