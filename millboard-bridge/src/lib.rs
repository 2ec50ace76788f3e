//! Millboard bridge: the typed gateway between the dashboard UI and the
//! sync engine.
//!
//! The UI sends JSON. This bridge parses it into exactly one of N valid
//! view operations, refuses data views the current phase cannot serve,
//! executes the rest against the controller and returns a structured
//! result with a freshness banner.
//!
//! - Every operation is an enum variant with validated parameters
//! - Every response is a structured type, not free-form text
//! - Invalid operations are rejected at parse time, not at runtime

pub mod error;
pub mod ops;
pub mod protocol;
pub mod state;

pub use error::{BridgeError, BridgeResult};
pub use ops::ViewOperation;
pub use protocol::{generate_banner, AuditEntry, Gateway, ViewRequest, ViewResponse};
pub use state::OperationResult;
