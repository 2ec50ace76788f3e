//! View operations: the complete vocabulary the presentation layer may use.
//!
//! A request parses into exactly one of these variants or is rejected.
//! Adding a variant forces a handler in the protocol module.

use millboard_pipeline::lead_time_browser::FilterChange;
use millboard_pipeline::{ProcessingOutcome, QuerySpec, SortSpec, Stage};
use serde::{Deserialize, Serialize};

/// Every operation the dashboard UI can request of the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "params")]
pub enum ViewOperation {
    // ========================================
    // STATUS (always allowed)
    // ========================================
    /// Phase, pipeline flag, staleness and degraded endpoints.
    Status,

    // ========================================
    // DATA VIEWS (read-only, Ready only)
    // ========================================
    /// Summary counters plus KPIs over every collection.
    Overview,

    /// Jobs table with stage groups for the inventory view.
    Jobs {
        #[serde(default)]
        query: QuerySpec,
        #[serde(default)]
        stage_group: Option<Stage>,
    },

    /// Lead times from the cached snapshot with parallelizable tasks.
    LeadTimes {
        #[serde(default)]
        query: QuerySpec,
    },

    /// One server-paginated lead-time page, fetched live.
    LeadTimePage {
        #[serde(default)]
        filters: Vec<FilterChange>,
        #[serde(default)]
        sort: Option<SortSpec>,
        #[serde(default = "first_page")]
        page: usize,
        #[serde(default)]
        page_size: Option<usize>,
    },

    Pairs {
        #[serde(default)]
        query: QuerySpec,
    },

    Stock {
        #[serde(default)]
        query: QuerySpec,
    },

    // ========================================
    // TRANSITIONS (audited)
    // ========================================
    Refresh {
        #[serde(default)]
        force: bool,
    },

    /// The upload collaborator started an ETL run.
    BeginProcessing,

    /// The upload collaborator finished an ETL run.
    CompleteProcessing { outcome: ProcessingOutcome },

    Retry,

    Reset,
}

fn first_page() -> usize {
    1
}

impl ViewOperation {
    /// Read-only operations never touch the controller's state.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            ViewOperation::Status
                | ViewOperation::Overview
                | ViewOperation::Jobs { .. }
                | ViewOperation::LeadTimes { .. }
                | ViewOperation::LeadTimePage { .. }
                | ViewOperation::Pairs { .. }
                | ViewOperation::Stock { .. }
        )
    }

    /// Data views are reachable only once a snapshot is loaded.
    pub fn requires_ready(&self) -> bool {
        self.is_read_only() && !matches!(self, ViewOperation::Status)
    }

    /// Name used in refusals and logs.
    pub fn name(&self) -> &'static str {
        match self {
            ViewOperation::Status => "Status",
            ViewOperation::Overview => "Overview",
            ViewOperation::Jobs { .. } => "Jobs",
            ViewOperation::LeadTimes { .. } => "LeadTimes",
            ViewOperation::LeadTimePage { .. } => "LeadTimePage",
            ViewOperation::Pairs { .. } => "Pairs",
            ViewOperation::Stock { .. } => "Stock",
            ViewOperation::Refresh { .. } => "Refresh",
            ViewOperation::BeginProcessing => "BeginProcessing",
            ViewOperation::CompleteProcessing { .. } => "CompleteProcessing",
            ViewOperation::Retry => "Retry",
            ViewOperation::Reset => "Reset",
        }
    }

    /// Human-readable description for the audit log.
    pub fn describe(&self) -> String {
        match self {
            ViewOperation::Status => "Controller status".into(),
            ViewOperation::Overview => "Dashboard overview".into(),
            ViewOperation::Jobs { query, stage_group } => match stage_group {
                Some(stage) => format!("Jobs page {} (groups: {stage})", query.page),
                None => format!("Jobs page {}", query.page),
            },
            ViewOperation::LeadTimes { query } => format!("Lead times page {}", query.page),
            ViewOperation::LeadTimePage { filters, page, .. } => {
                format!("Live lead-time page {page} with {} filters", filters.len())
            }
            ViewOperation::Pairs { query } => format!("Parallelization pairs page {}", query.page),
            ViewOperation::Stock { query } => format!("Stock page {}", query.page),
            ViewOperation::Refresh { force: true } => "Forced refresh".into(),
            ViewOperation::Refresh { force: false } => "Refresh if stale".into(),
            ViewOperation::BeginProcessing => "ETL processing started".into(),
            ViewOperation::CompleteProcessing { outcome } => match outcome {
                ProcessingOutcome::Succeeded => "ETL processing succeeded".into(),
                ProcessingOutcome::Failed(reason) => format!("ETL processing failed ({reason})"),
            },
            ViewOperation::Retry => "Retry after connection error".into(),
            ViewOperation::Reset => "Reset all local state".into(),
        }
    }

    /// The table query carried by the operation, if any.
    pub fn table_query(&self) -> Option<&QuerySpec> {
        match self {
            ViewOperation::Jobs { query, .. }
            | ViewOperation::LeadTimes { query }
            | ViewOperation::Pairs { query }
            | ViewOperation::Stock { query } => Some(query),
            _ => None,
        }
    }
}
