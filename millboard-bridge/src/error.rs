//! Gateway error types.
//!
//! Every failure mode has a named variant. No stringly-typed errors.

use millboard_pipeline::{FetchError, RefreshError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Invalid parameter for {op}: {reason}")]
    InvalidParameter { op: String, reason: String },

    /// The current phase does not allow the operation.
    #[error("Operation refused in phase {phase}: {reason}")]
    Refused { reason: String, phase: String },

    #[error("Sync state error: {0}")]
    StateError(String),

    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Result type alias for gateway operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
