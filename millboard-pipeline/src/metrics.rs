//! KPIs over whatever record set a view currently shows.
//!
//! Everything here is a pure function of its input and is recomputed on
//! every call. Empty input gives zeros.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{
    JobRecord, LeadTimeRecord, ParallelizationPair, Stage, StockAdequacy, StockRecord, Urgency,
};
use crate::util::{mean, percentage};

/// Count and share of one bucket of an enum field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Share {
    pub label: String,
    pub count: usize,
    pub pct: f64,
}

fn shares<'a>(labels: impl Iterator<Item = &'a str>, vocabulary: &[&'a str]) -> Vec<Share> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut total = 0usize;
    for label in labels {
        *counts.entry(label).or_insert(0) += 1;
        total += 1;
    }
    vocabulary
        .iter()
        .map(|label| {
            let count = counts.get(label).copied().unwrap_or(0);
            Share {
                label: label.to_string(),
                count,
                pct: percentage(count as f64, total as f64),
            }
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMetrics {
    pub total_jobs: usize,
    pub unique_items: usize,
    pub total_quantity: f64,
    pub avg_quantity: f64,
    pub avg_lead_time_days: f64,
    pub critical_jobs: usize,
    pub by_stage: Vec<Share>,
    pub by_urgency: Vec<Share>,
}

pub fn job_metrics(jobs: &[JobRecord]) -> JobMetrics {
    let quantities: Vec<f64> = jobs.iter().map(|j| j.quantity).collect();
    let lead_times: Vec<f64> = jobs.iter().map(|j| j.lead_time_estimate_days).collect();
    let mut items: Vec<&str> = jobs.iter().map(|j| j.item_code.as_str()).collect();
    items.sort_unstable();
    items.dedup();
    let stages: Vec<&str> = Stage::ALL.iter().map(|s| s.as_str()).collect();
    let urgencies: Vec<&str> = Urgency::ALL.iter().map(|u| u.as_str()).collect();
    JobMetrics {
        total_jobs: jobs.len(),
        unique_items: items.len(),
        total_quantity: quantities.iter().sum(),
        avg_quantity: mean(&quantities),
        avg_lead_time_days: mean(&lead_times),
        critical_jobs: jobs.iter().filter(|j| j.urgency == Urgency::Critical).count(),
        by_stage: shares(jobs.iter().map(|j| j.stage.as_str()), &stages),
        by_urgency: shares(jobs.iter().map(|j| j.urgency.as_str()), &urgencies),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadTimeMetrics {
    pub total_items: usize,
    pub total_time_saved_days: f64,
    pub avg_efficiency_gain_pct: f64,
    pub top_efficiency_gain_pct: f64,
    pub avg_serial_days: f64,
    pub avg_parallelized_days: f64,
}

pub fn lead_time_metrics(records: &[LeadTimeRecord]) -> LeadTimeMetrics {
    let efficiencies: Vec<f64> = records.iter().map(|r| r.efficiency_gain_pct()).collect();
    let serial: Vec<f64> = records.iter().map(|r| r.serial_lead_time_days).collect();
    let parallel: Vec<f64> = records.iter().map(|r| r.parallelized_lead_time_days).collect();
    LeadTimeMetrics {
        total_items: records.len(),
        total_time_saved_days: records.iter().map(|r| r.time_saved_days()).sum(),
        avg_efficiency_gain_pct: mean(&efficiencies),
        top_efficiency_gain_pct: efficiencies.iter().copied().fold(0.0, f64::max),
        avg_serial_days: mean(&serial),
        avg_parallelized_days: mean(&parallel),
    }
}

/// Pair-level summary. Only pairs that can actually run in parallel count
/// toward savings and efficiency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParallelizationMetrics {
    pub total_pairs_analyzed: usize,
    pub parallelizable_pairs: usize,
    pub total_time_savings_days: f64,
    pub avg_efficiency_gain_pct: f64,
    pub top_efficiency_gain_pct: f64,
}

pub fn parallelization_metrics(pairs: &[ParallelizationPair]) -> ParallelizationMetrics {
    let runnable: Vec<&ParallelizationPair> = pairs.iter().filter(|p| p.can_run_parallel).collect();
    let efficiencies: Vec<f64> = runnable.iter().map(|p| p.efficiency_gain_pct()).collect();
    ParallelizationMetrics {
        total_pairs_analyzed: pairs.len(),
        parallelizable_pairs: runnable.len(),
        total_time_savings_days: runnable.iter().map(|p| p.time_saved_days()).sum(),
        avg_efficiency_gain_pct: mean(&efficiencies),
        top_efficiency_gain_pct: efficiencies.iter().copied().fold(0.0, f64::max),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StockMetrics {
    pub total_items: usize,
    /// Badge count on the stock tab.
    pub out_of_stock: usize,
    pub shortage: usize,
    pub adequate: usize,
    pub excess: usize,
    pub unknown: usize,
    pub by_adequacy: Vec<Share>,
}

pub fn stock_metrics(records: &[StockRecord]) -> StockMetrics {
    let count = |adequacy: StockAdequacy| {
        records
            .iter()
            .filter(|r| r.stock_adequacy == adequacy)
            .count()
    };
    let vocabulary: Vec<&str> = StockAdequacy::ALL.iter().map(|a| a.as_str()).collect();
    StockMetrics {
        total_items: records.len(),
        out_of_stock: count(StockAdequacy::OutOfStock),
        shortage: count(StockAdequacy::Shortage),
        adequate: count(StockAdequacy::Adequate),
        excess: count(StockAdequacy::Excess),
        unknown: count(StockAdequacy::Unknown),
        by_adequacy: shares(records.iter().map(|r| r.stock_adequacy.as_str()), &vocabulary),
    }
}

// ---------------------------------------------------------------------------
// Stage groups
// ---------------------------------------------------------------------------

/// Jobs of one stage rolled up for the inventory table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageGroup {
    pub stage: Stage,
    pub job_count: usize,
    pub total_quantity: f64,
    /// Job count per urgency label.
    pub urgency_breakdown: BTreeMap<String, usize>,
}

/// Group jobs by stage in first-seen order.
pub fn stage_groups(jobs: &[JobRecord]) -> Vec<StageGroup> {
    let mut groups: Vec<StageGroup> = Vec::new();
    for job in jobs {
        let index = match groups.iter().position(|g| g.stage == job.stage) {
            Some(index) => index,
            None => {
                groups.push(StageGroup {
                    stage: job.stage,
                    job_count: 0,
                    total_quantity: 0.0,
                    urgency_breakdown: BTreeMap::new(),
                });
                groups.len() - 1
            }
        };
        let group = &mut groups[index];
        group.job_count += 1;
        group.total_quantity += job.quantity;
        *group
            .urgency_breakdown
            .entry(job.urgency.as_str().to_string())
            .or_insert(0) += 1;
    }
    groups
}

/// Groups restricted to one stage; `None` keeps them all.
pub fn filter_stage_groups(groups: &[StageGroup], stage: Option<Stage>) -> Vec<StageGroup> {
    groups
        .iter()
        .filter(|g| stage.map(|s| g.stage == s).unwrap_or(true))
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Parallelizable tasks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Complexity {
    High,
    Medium,
    Low,
}

impl Complexity {
    /// Classify by efficiency gain: above 25 % is High, above 15 % Medium.
    pub fn from_efficiency(pct: f64) -> Self {
        if pct > 25.0 {
            Complexity::High
        } else if pct > 15.0 {
            Complexity::Medium
        } else {
            Complexity::Low
        }
    }
}

/// Days of serial work one resource covers.
pub const DAYS_PER_RESOURCE: f64 = 20.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelizableTask {
    pub item_code: String,
    pub current_days: f64,
    pub parallel_days: f64,
    pub time_saved_days: f64,
    pub efficiency_gain_pct: f64,
    pub complexity: Complexity,
    pub resource_requirement: u32,
}

pub fn parallelizable_tasks(records: &[LeadTimeRecord]) -> Vec<ParallelizableTask> {
    records
        .iter()
        .map(|r| {
            let efficiency = r.efficiency_gain_pct();
            ParallelizableTask {
                item_code: r.item_code.clone(),
                current_days: r.serial_lead_time_days,
                parallel_days: r.parallelized_lead_time_days,
                time_saved_days: r.time_saved_days(),
                efficiency_gain_pct: efficiency,
                complexity: Complexity::from_efficiency(efficiency),
                resource_requirement: (r.serial_lead_time_days / DAYS_PER_RESOURCE).ceil() as u32,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PairItem;

    fn job(code: &str, stage: Stage, urgency: Urgency, quantity: f64) -> JobRecord {
        JobRecord {
            item_code: code.into(),
            stage,
            process: "Cut".into(),
            quantity,
            urgency,
            lead_time_estimate_days: 2.0,
        }
    }

    #[test]
    fn empty_inputs_are_all_zero() {
        let jobs = job_metrics(&[]);
        assert_eq!(jobs.total_jobs, 0);
        assert_eq!(jobs.avg_quantity, 0.0);
        assert!(jobs.by_stage.iter().all(|s| s.pct == 0.0));
        assert_eq!(lead_time_metrics(&[]), LeadTimeMetrics::default());
        assert_eq!(parallelization_metrics(&[]), ParallelizationMetrics::default());
        assert_eq!(stock_metrics(&[]).out_of_stock, 0);
    }

    #[test]
    fn job_breakdown_percentages() {
        let jobs = vec![
            job("A", Stage::Rfm, Urgency::Critical, 10.0),
            job("A", Stage::Rfd, Urgency::Low, 30.0),
            job("B", Stage::Rfm, Urgency::Critical, 20.0),
            job("C", Stage::Rfm, Urgency::High, 0.0),
        ];
        let m = job_metrics(&jobs);
        assert_eq!(m.total_jobs, 4);
        assert_eq!(m.unique_items, 3);
        assert_eq!(m.total_quantity, 60.0);
        assert_eq!(m.avg_quantity, 15.0);
        assert_eq!(m.critical_jobs, 2);
        let rfm = m.by_stage.iter().find(|s| s.label == "RFM").unwrap();
        assert_eq!(rfm.count, 3);
        assert!((rfm.pct - 75.0).abs() < 1e-9);
    }

    #[test]
    fn lead_time_kpis() {
        let records = vec![
            LeadTimeRecord::new("A", 10.0, 7.0),
            LeadTimeRecord::new("B", 20.0, 10.0),
        ];
        let m = lead_time_metrics(&records);
        assert!((m.total_time_saved_days - 13.0).abs() < 1e-9);
        assert!((m.avg_efficiency_gain_pct - 40.0).abs() < 1e-9);
        assert!((m.top_efficiency_gain_pct - 50.0).abs() < 1e-9);
        assert!((m.avg_serial_days - 15.0).abs() < 1e-9);
    }

    #[test]
    fn only_runnable_pairs_count_toward_savings() {
        let item = |code: &str| PairItem {
            item_code: code.into(),
            urgency: Urgency::Medium,
            process: String::new(),
            machines: String::new(),
        };
        let pair = |a: &str, b: &str, runnable: bool| ParallelizationPair {
            item_a: item(a),
            item_b: item(b),
            sequential_time_days: 10.0,
            parallel_time_days: 6.0,
            can_run_parallel: runnable,
            process_conflicts: Vec::new(),
            machine_conflicts: Vec::new(),
        };
        let m = parallelization_metrics(&[pair("A", "B", true), pair("C", "D", false)]);
        assert_eq!(m.total_pairs_analyzed, 2);
        assert_eq!(m.parallelizable_pairs, 1);
        assert!((m.total_time_savings_days - 4.0).abs() < 1e-9);
        assert!((m.avg_efficiency_gain_pct - 40.0).abs() < 1e-9);
    }

    #[test]
    fn stock_badge_counts_out_of_stock() {
        let rec = |code: &str, adequacy| StockRecord {
            item_code: code.into(),
            stock_adequacy: adequacy,
        };
        let m = stock_metrics(&[
            rec("A", StockAdequacy::OutOfStock),
            rec("B", StockAdequacy::OutOfStock),
            rec("C", StockAdequacy::Excess),
            rec("D", StockAdequacy::Unknown),
        ]);
        assert_eq!(m.out_of_stock, 2);
        assert_eq!(m.unknown, 1);
        let share = m.by_adequacy.iter().find(|s| s.label == "Out of Stock").unwrap();
        assert!((share.pct - 50.0).abs() < 1e-9);
    }

    #[test]
    fn stage_groups_keep_first_seen_order() {
        let jobs = vec![
            job("A", Stage::Rfd, Urgency::Low, 5.0),
            job("B", Stage::Rfm, Urgency::High, 2.0),
            job("C", Stage::Rfd, Urgency::Low, 1.0),
        ];
        let groups = stage_groups(&jobs);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].stage, Stage::Rfd);
        assert_eq!(groups[0].job_count, 2);
        assert_eq!(groups[0].total_quantity, 6.0);
        assert_eq!(groups[0].urgency_breakdown.get("LOW"), Some(&2));
        assert_eq!(filter_stage_groups(&groups, Some(Stage::Rfm)).len(), 1);
        assert_eq!(filter_stage_groups(&groups, None).len(), 2);
    }

    #[test]
    fn task_complexity_and_resources() {
        let tasks = parallelizable_tasks(&[
            LeadTimeRecord::new("A", 45.0, 30.0),
            LeadTimeRecord::new("B", 20.0, 16.0),
            LeadTimeRecord::new("C", 10.0, 9.0),
        ]);
        assert_eq!(tasks[0].complexity, Complexity::High);
        assert_eq!(tasks[0].resource_requirement, 3);
        assert_eq!(tasks[1].complexity, Complexity::Medium);
        assert_eq!(tasks[1].resource_requirement, 1);
        assert_eq!(tasks[2].complexity, Complexity::Low);
    }
}
