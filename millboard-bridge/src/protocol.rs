//! Gateway protocol: request parsing, gating, dispatch and response shaping.
//!
//! 1. Raw JSON -> parse into `ViewOperation` (reject if invalid)
//! 2. Validate parameters (reject if out of bounds)
//! 3. Check the controller phase (refuse data views until Ready)
//! 4. Dispatch to the controller or the query engine
//! 5. Attach a banner describing data freshness
//! 6. Record the request in the audit log

use millboard_pipeline::lead_time_browser::LeadTimeBrowser;
use millboard_pipeline::metrics;
use millboard_pipeline::query::run_query;
use millboard_pipeline::{
    Controller, ControllerStatus, DashboardSnapshot, Phase, Predicate, ProcessingOutcome,
    QuerySpec, RefreshMode,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{BridgeError, BridgeResult};
use crate::ops::ViewOperation;
use crate::state::*;

/// A request from the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewRequest {
    pub operation: ViewOperation,

    /// Request ID for tracking.
    pub request_id: String,

    /// Optional context: which screen issued the request.
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewResponse {
    pub result: OperationResult,

    /// Request ID (echoed back).
    pub request_id: String,

    pub read_only: bool,

    /// Controller phase after the operation.
    pub phase: Phase,

    /// Freshness notice the UI shows above the data.
    pub banner: Option<String>,
}

/// Audit log entry, one per processed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence: u64,
    pub request_id: String,
    pub operation: String,
    pub was_read_only: bool,
    pub success: bool,
    pub error: Option<String>,
    pub phase_before: Phase,
    pub phase_after: Phase,
}

/// The Gateway: the only surface the UI talks to.
pub struct Gateway {
    controller: Controller,

    /// Audit log of all requests.
    pub audit_log: Vec<AuditEntry>,

    /// Upper bound for any requested page size.
    pub max_page_size: usize,

    /// Refuse data views outside Ready.
    pub phase_gate_enabled: bool,

    /// Live lead-time table. Filter changes accumulate across requests so
    /// client-side filters never cost a round-trip.
    lead_times: LeadTimeBrowser,

    step: u64,
}

impl Gateway {
    pub fn new(controller: Controller) -> Self {
        let max_page_size = controller.config().max_page_size;
        let lead_times = LeadTimeBrowser::new(controller.config().page_size(0));
        Gateway {
            controller,
            audit_log: Vec::new(),
            max_page_size,
            phase_gate_enabled: true,
            lead_times,
            step: 0,
        }
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn lead_times(&self) -> &LeadTimeBrowser {
        &self.lead_times
    }

    /// Parse raw JSON into a validated request.
    pub fn parse_request(&self, raw_json: &str) -> BridgeResult<ViewRequest> {
        let request: ViewRequest = serde_json::from_str(raw_json).map_err(|e| {
            BridgeError::UnknownOperation(format!("Failed to parse request: {}", e))
        })?;

        self.validate_operation(&request.operation)?;

        Ok(request)
    }

    /// Validate operation parameters.
    pub fn validate_operation(&self, op: &ViewOperation) -> BridgeResult<()> {
        if let Some(query) = op.table_query() {
            self.validate_query(op.name(), query)?;
        }
        match op {
            ViewOperation::LeadTimePage { page, page_size, .. } => {
                if *page == 0 {
                    return Err(invalid(op.name(), "page is 1-based".into()));
                }
                if let Some(size) = page_size {
                    self.validate_page_size(op.name(), *size)?;
                }
            }
            ViewOperation::CompleteProcessing {
                outcome: ProcessingOutcome::Failed(reason),
            } if reason.trim().is_empty() => {
                return Err(invalid(op.name(), "failure reason must not be empty".into()));
            }
            _ => {}
        }
        Ok(())
    }

    fn validate_query(&self, op: &str, query: &QuerySpec) -> BridgeResult<()> {
        if query.page == 0 {
            return Err(invalid(op, "page is 1-based".into()));
        }
        self.validate_page_size(op, query.page_size)?;
        for filter in &query.filters {
            let numeric = matches!(
                filter.predicate,
                Predicate::AtLeast(_) | Predicate::AtMost(_)
            );
            if numeric && !filter.field.is_numeric() {
                return Err(invalid(
                    op,
                    format!("threshold filter on non-numeric field {:?}", filter.field),
                ));
            }
        }
        Ok(())
    }

    fn validate_page_size(&self, op: &str, size: usize) -> BridgeResult<()> {
        if size == 0 || size > self.max_page_size {
            return Err(invalid(
                op,
                format!("page_size={} out of range [1, {}]", size, self.max_page_size),
            ));
        }
        Ok(())
    }

    /// Data views need a loaded snapshot. Status and transitions always
    /// pass; the controller enforces its own transition table.
    pub fn check_phase(&self, op: &ViewOperation) -> BridgeResult<()> {
        if !self.phase_gate_enabled || !op.requires_ready() {
            return Ok(());
        }
        let phase = self.controller.phase();
        let reason = match phase {
            Phase::Ready => return Ok(()),
            Phase::AwaitingUpload => {
                "No data yet. Upload a production file to run the ETL pipeline."
            }
            Phase::Processing => "ETL processing is still running.",
            Phase::ConnectionError => "The dashboard API is unreachable. Run Retry first.",
        };
        Err(BridgeError::Refused {
            reason: reason.into(),
            phase: phase.to_string(),
        })
    }

    /// Process a validated request.
    pub async fn process(&mut self, request: &ViewRequest) -> BridgeResult<ViewResponse> {
        let phase_before = self.controller.phase();
        self.step += 1;

        let result = match self.check_phase(&request.operation) {
            Ok(()) => self.dispatch(&request.operation).await,
            Err(e) => Err(e),
        };

        let status = self.controller.status();
        if let Err(e) = &result {
            log::warn!(
                "request_id={} op={} phase={} error={}",
                request.request_id,
                request.operation.name(),
                status.phase,
                e
            );
        }

        self.audit_log.push(AuditEntry {
            sequence: self.step,
            request_id: request.request_id.clone(),
            operation: request.operation.describe(),
            was_read_only: request.operation.is_read_only(),
            success: result.is_ok(),
            error: result.as_ref().err().map(|e| e.to_string()),
            phase_before,
            phase_after: status.phase,
        });

        Ok(ViewResponse {
            result: result?,
            request_id: request.request_id.clone(),
            read_only: request.operation.is_read_only(),
            phase: status.phase,
            banner: generate_banner(&status),
        })
    }

    fn snapshot(&self) -> BridgeResult<Arc<DashboardSnapshot>> {
        self.controller
            .snapshot()
            .ok_or_else(|| BridgeError::StateError("no snapshot loaded".into()))
    }

    async fn dispatch(&mut self, op: &ViewOperation) -> BridgeResult<OperationResult> {
        match op {
            ViewOperation::Status => Ok(OperationResult::Status(self.controller.status())),
            ViewOperation::Overview => {
                let snapshot = self.snapshot()?;
                Ok(OperationResult::Overview(Overview::from_snapshot(&snapshot)))
            }
            ViewOperation::Jobs { query, stage_group } => {
                let snapshot = self.snapshot()?;
                let matching = run_query(&snapshot.jobs, &all_of(query));
                let groups = metrics::stage_groups(&matching.items);
                Ok(OperationResult::Jobs(JobsView {
                    metrics: metrics::job_metrics(&matching.items),
                    stage_groups: metrics::filter_stage_groups(&groups, *stage_group),
                    page: run_query(&snapshot.jobs, query),
                }))
            }
            ViewOperation::LeadTimes { query } => {
                let snapshot = self.snapshot()?;
                let matching = run_query(&snapshot.lead_times, &all_of(query));
                let page = run_query(&snapshot.lead_times, query);
                Ok(OperationResult::LeadTimes(LeadTimesView {
                    metrics: metrics::lead_time_metrics(&matching.items),
                    tasks: metrics::parallelizable_tasks(&page.items),
                    page,
                }))
            }
            ViewOperation::LeadTimePage {
                filters,
                sort,
                page,
                page_size,
            } => {
                for change in filters {
                    self.lead_times.set_filter(change.clone());
                }
                if let Some(sort) = sort {
                    self.lead_times.set_sort(Some(*sort));
                }
                if let Some(size) = page_size {
                    let size = self.controller.config().page_size(*size);
                    self.lead_times.set_page_size(size);
                }
                self.lead_times.set_page(*page);

                if self.lead_times.needs_fetch() {
                    let scope = self.controller.view_scope();
                    self.lead_times
                        .sync(self.controller.api().as_ref(), scope.token())
                        .await?;
                }
                let view = self.lead_times.view();
                Ok(OperationResult::LeadTimePage(LeadTimePageView {
                    metrics: metrics::lead_time_metrics(&view.rows),
                    view,
                }))
            }
            ViewOperation::Pairs { query } => {
                let snapshot = self.snapshot()?;
                let matching = run_query(&snapshot.pairs, &all_of(query));
                Ok(OperationResult::Pairs(PairsView {
                    metrics: metrics::parallelization_metrics(&matching.items),
                    page: run_query(&snapshot.pairs, query),
                }))
            }
            ViewOperation::Stock { query } => {
                let snapshot = self.snapshot()?;
                let matching = run_query(&snapshot.stock, &all_of(query));
                Ok(OperationResult::Stock(StockView {
                    metrics: metrics::stock_metrics(&matching.items),
                    page: run_query(&snapshot.stock, query),
                }))
            }
            ViewOperation::Refresh { force } => {
                let mode = if *force {
                    RefreshMode::Force
                } else {
                    RefreshMode::IfStale
                };
                let report = self.controller.refresh(mode).await?;
                self.lead_times.invalidate();
                Ok(OperationResult::Refreshed { report })
            }
            ViewOperation::BeginProcessing => {
                let phase = self.controller.begin_processing()?;
                Ok(OperationResult::Transition { phase })
            }
            ViewOperation::CompleteProcessing { outcome } => {
                let phase = self
                    .controller
                    .on_external_processing_complete(outcome.clone())
                    .await?;
                self.lead_times.invalidate();
                Ok(OperationResult::Transition { phase })
            }
            ViewOperation::Retry => {
                let phase = self.controller.retry().await?;
                self.lead_times.invalidate();
                Ok(OperationResult::Transition { phase })
            }
            ViewOperation::Reset => {
                self.controller.reset()?;
                self.lead_times = LeadTimeBrowser::new(self.controller.config().page_size(0));
                Ok(OperationResult::Cleared)
            }
        }
    }
}

fn invalid(op: &str, reason: String) -> BridgeError {
    BridgeError::InvalidParameter {
        op: op.into(),
        reason,
    }
}

/// The same query without the page window, for KPIs over the whole
/// filtered set.
fn all_of(query: &QuerySpec) -> QuerySpec {
    QuerySpec {
        page: 1,
        page_size: usize::MAX,
        ..query.clone()
    }
}

/// Freshness notice for the current controller status.
///
/// AwaitingUpload, stale data and an unreachable API read differently so the
/// UI never confuses "no data yet" with "data exists but is old".
pub fn generate_banner(status: &ControllerStatus) -> Option<String> {
    match status.phase {
        Phase::AwaitingUpload => Some(
            "NOTE: No processed data yet. Upload a production file to start.".into(),
        ),
        Phase::Processing => Some("NOTE: ETL processing in progress.".into()),
        Phase::ConnectionError => Some(
            "CRITICAL: The dashboard API could not be reached after processing. \
             Check the backend and retry."
                .into(),
        ),
        Phase::Ready if status.stale => {
            let since = status
                .captured_at
                .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_else(|| "an earlier session".into());
            let cause = status.last_error.as_deref().unwrap_or("unknown error");
            Some(format!(
                "WARNING: Showing cached data from {since}. The last refresh failed ({cause})."
            ))
        }
        Phase::Ready if !status.degraded.is_empty() => {
            let names: Vec<&str> = status.degraded.iter().map(|e| e.as_str()).collect();
            Some(format!(
                "WARNING: Partial data. Unavailable: {}.",
                names.join(", ")
            ))
        }
        Phase::Ready => None,
    }
}
