//! Structured results returned to the presentation layer.
//!
//! Every view carries the page it renders plus the KPIs computed over the
//! full filtered set, so cards and tables never disagree.

use chrono::{DateTime, Utc};
use millboard_pipeline::lead_time_browser::LeadTimeView;
use millboard_pipeline::metrics::{
    self, JobMetrics, LeadTimeMetrics, ParallelizableTask, ParallelizationMetrics, StageGroup,
    StockMetrics,
};
use millboard_pipeline::{
    ControllerStatus, DashboardSnapshot, DashboardSummary, JobRecord, LeadTimeRecord, Page,
    ParallelizationPair, Phase, RefreshReport, StockRecord,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationResult {
    Status(ControllerStatus),
    Overview(Overview),
    Jobs(JobsView),
    LeadTimes(LeadTimesView),
    LeadTimePage(LeadTimePageView),
    Pairs(PairsView),
    Stock(StockView),
    /// A transition that lands in a new phase.
    Transition { phase: Phase },
    Refreshed { report: RefreshReport },
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overview {
    pub summary: DashboardSummary,
    pub jobs: JobMetrics,
    pub lead_times: LeadTimeMetrics,
    pub parallelization: ParallelizationMetrics,
    pub stock: StockMetrics,
    pub records_dropped: usize,
    pub records_duplicated: usize,
    /// Some endpoints fell back to empty data.
    pub partial: bool,
    pub captured_at: DateTime<Utc>,
}

impl Overview {
    pub fn from_snapshot(snapshot: &DashboardSnapshot) -> Self {
        Self {
            summary: snapshot.summary.clone(),
            jobs: metrics::job_metrics(&snapshot.jobs),
            lead_times: metrics::lead_time_metrics(&snapshot.lead_times),
            parallelization: metrics::parallelization_metrics(&snapshot.pairs),
            stock: metrics::stock_metrics(&snapshot.stock),
            records_dropped: snapshot.dropped.total(),
            records_duplicated: snapshot.duplicates.total(),
            partial: snapshot.is_partial(),
            captured_at: snapshot.captured_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobsView {
    pub page: Page<JobRecord>,
    pub metrics: JobMetrics,
    pub stage_groups: Vec<StageGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadTimesView {
    pub page: Page<LeadTimeRecord>,
    pub metrics: LeadTimeMetrics,
    /// Parallelizable tasks for the rows on this page.
    pub tasks: Vec<ParallelizableTask>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadTimePageView {
    pub view: LeadTimeView,
    pub metrics: LeadTimeMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairsView {
    pub page: Page<ParallelizationPair>,
    pub metrics: ParallelizationMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockView {
    pub page: Page<StockRecord>,
    pub metrics: StockMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use millboard_pipeline::{Stage, Urgency};

    fn snapshot() -> DashboardSnapshot {
        let mut snapshot = DashboardSnapshot::empty(Utc.timestamp_millis_opt(5_000).unwrap());
        snapshot.lead_times = vec![
            LeadTimeRecord::new("A", 10.0, 7.0),
            LeadTimeRecord::new("B", 20.0, 10.0),
        ];
        snapshot.jobs = vec![JobRecord {
            item_code: "A".into(),
            stage: Stage::Rfd,
            process: "Cut".into(),
            quantity: 4.0,
            urgency: Urgency::High,
            lead_time_estimate_days: 3.0,
        }];
        snapshot.dropped.lead_times = 2;
        snapshot.duplicates.jobs = 1;
        snapshot
    }

    #[test]
    fn test_overview_counts_every_collection() {
        let overview = Overview::from_snapshot(&snapshot());
        assert_eq!(overview.lead_times.total_items, 2);
        assert!((overview.lead_times.total_time_saved_days - 13.0).abs() < 1e-9);
        assert_eq!(overview.jobs.total_jobs, 1);
        assert_eq!(overview.stock.total_items, 0);
        assert_eq!(overview.records_dropped, 2);
        assert_eq!(overview.records_duplicated, 1);
        assert!(!overview.partial);
        assert_eq!(overview.captured_at.timestamp_millis(), 5_000);
    }

    #[test]
    fn test_result_is_tagged_by_kind() {
        let json = serde_json::to_value(OperationResult::Transition { phase: Phase::Ready }).unwrap();
        assert_eq!(json["kind"], "transition");
        assert_eq!(json["phase"], "ready");
        let json = serde_json::to_value(OperationResult::Cleared).unwrap();
        assert_eq!(json["kind"], "cleared");
    }
}
