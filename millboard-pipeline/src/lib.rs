//! Client-side sync and caching engine for the manufacturing-ETL dashboard.
//!
//! The [`controller::Controller`] decides when to trust the durable cache and
//! when to refetch; the [`aggregator::Aggregator`] fans out to the API and
//! tolerates partial failure; the [`query`] engine and [`metrics`] derive
//! views from the resulting snapshot.

pub mod aggregator;
pub mod api;
pub mod cache;
pub mod clock;
pub mod components;
pub mod config;
pub mod controller;
pub mod error;
pub mod export;
pub mod fake_api;
pub mod filter;
pub mod lead_time_browser;
pub mod metrics;
pub mod normalizer;
pub mod query;
pub mod selector;
pub mod source;
pub mod types;
pub mod util;

pub use aggregator::{Aggregator, RefreshOutcome, RefreshStatus};
pub use api::{DashboardApi, HttpDashboardApi};
pub use cache::{CacheStore, FileStore, KeyValueStore, MemoryStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SyncConfig;
pub use controller::{
    AutoRefreshHandle, Controller, ControllerStatus, Phase, ProcessingOutcome, RefreshMode,
    RefreshReport, ViewScope,
};
pub use error::{CacheError, FetchError, RefreshError};
pub use query::{Field, FieldFilter, Page, Predicate, QueryEngine, QuerySpec, SortDirection, SortSpec};
pub use types::{
    DashboardSnapshot, DashboardSummary, Endpoint, JobRecord, LeadTimeRecord, PairItem,
    ParallelizationPair, PipelineState, Stage, StockAdequacy, StockRecord, Urgency,
};
