use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Vocabularies
// ---------------------------------------------------------------------------

/// Upper-case a raw enum value and fold spaces/dashes into underscores.
fn vocabulary_key(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            other => other.to_ascii_uppercase(),
        })
        .collect()
}

/// Production stage a job currently sits in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    WipRaw,
    WipMc,
    Rfm,
    Rfd,
    Production,
    Unknown,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::WipRaw,
        Stage::WipMc,
        Stage::Rfm,
        Stage::Rfd,
        Stage::Production,
        Stage::Unknown,
    ];

    /// Match a raw upstream value against the stage vocabulary.
    /// Anything unrecognized maps to `Unknown` so it stays filterable.
    pub fn from_raw(raw: &str) -> Stage {
        match vocabulary_key(raw).as_str() {
            "WIP_RAW" => Stage::WipRaw,
            "WIP_MC" => Stage::WipMc,
            "RFM" => Stage::Rfm,
            "RFD" => Stage::Rfd,
            "PRODUCTION" => Stage::Production,
            _ => Stage::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::WipRaw => "WIP_RAW",
            Stage::WipMc => "WIP_MC",
            Stage::Rfm => "RFM",
            Stage::Rfd => "RFD",
            Stage::Production => "PRODUCTION",
            Stage::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Urgency classification of a job or pair item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Urgency {
    Critical,
    High,
    Medium,
    Low,
    Unknown,
}

impl Urgency {
    pub const ALL: [Urgency; 5] = [
        Urgency::Critical,
        Urgency::High,
        Urgency::Medium,
        Urgency::Low,
        Urgency::Unknown,
    ];

    pub fn from_raw(raw: &str) -> Urgency {
        match vocabulary_key(raw).as_str() {
            "CRITICAL" => Urgency::Critical,
            "HIGH" => Urgency::High,
            "MEDIUM" => Urgency::Medium,
            "LOW" => Urgency::Low,
            _ => Urgency::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Critical => "CRITICAL",
            Urgency::High => "HIGH",
            Urgency::Medium => "MEDIUM",
            Urgency::Low => "LOW",
            Urgency::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stock position of an item relative to demand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StockAdequacy {
    #[serde(rename = "Out of Stock")]
    OutOfStock,
    Shortage,
    Adequate,
    Excess,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl StockAdequacy {
    pub const ALL: [StockAdequacy; 5] = [
        StockAdequacy::OutOfStock,
        StockAdequacy::Shortage,
        StockAdequacy::Adequate,
        StockAdequacy::Excess,
        StockAdequacy::Unknown,
    ];

    pub fn from_raw(raw: &str) -> StockAdequacy {
        match vocabulary_key(raw).replace('_', "").as_str() {
            "OUTOFSTOCK" => StockAdequacy::OutOfStock,
            "SHORTAGE" => StockAdequacy::Shortage,
            "ADEQUATE" => StockAdequacy::Adequate,
            "EXCESS" => StockAdequacy::Excess,
            _ => StockAdequacy::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StockAdequacy::OutOfStock => "Out of Stock",
            StockAdequacy::Shortage => "Shortage",
            StockAdequacy::Adequate => "Adequate",
            StockAdequacy::Excess => "Excess",
            StockAdequacy::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for StockAdequacy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// Logical upstream operations the dashboard consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Summary,
    LeadTimes,
    StockStatus,
    ParallelizationPairs,
    Health,
}

impl Endpoint {
    /// Path below the API base URL.
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Summary => "dashboard-summary",
            Endpoint::LeadTimes => "lead-time",
            Endpoint::StockStatus => "stock-vs-demand",
            Endpoint::ParallelizationPairs => "optimized-parallelization",
            Endpoint::Health => "health",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Summary => "summary",
            Endpoint::LeadTimes => "lead_times",
            Endpoint::StockStatus => "stock_status",
            Endpoint::ParallelizationPairs => "parallelization_pairs",
            Endpoint::Health => "health",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Canonical records
// ---------------------------------------------------------------------------

/// One job on the shop floor. Identity is `(item_code, stage, process)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub item_code: String,
    pub stage: Stage,
    pub process: String,
    pub quantity: f64,
    pub urgency: Urgency,
    pub lead_time_estimate_days: f64,
}

impl JobRecord {
    pub fn identity(&self) -> (String, Stage, String) {
        (self.item_code.clone(), self.stage, self.process.clone())
    }
}

/// Serial vs. parallelized lead time for one item.
///
/// Savings and efficiency are derived on read and never stored, so they
/// always agree with the two lead times.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeadTimeRecord {
    pub item_code: String,
    pub serial_lead_time_days: f64,
    pub parallelized_lead_time_days: f64,
    pub category: String,
    pub priority: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urgency: Option<Urgency>,
}

pub const DEFAULT_CATEGORY: &str = "General";
pub const DEFAULT_PRIORITY: &str = "Medium";

impl LeadTimeRecord {
    /// Build a record, clamping both lead times to `0 <= parallelized <= serial`.
    pub fn new(item_code: impl Into<String>, serial: f64, parallelized: f64) -> Self {
        let (serial, parallelized) = clamp_lead_times(serial, parallelized);
        Self {
            item_code: item_code.into(),
            serial_lead_time_days: serial,
            parallelized_lead_time_days: parallelized,
            category: DEFAULT_CATEGORY.to_string(),
            priority: DEFAULT_PRIORITY.to_string(),
            stage: None,
            urgency: None,
        }
    }

    pub fn time_saved_days(&self) -> f64 {
        time_saved(self.serial_lead_time_days, self.parallelized_lead_time_days)
    }

    pub fn efficiency_gain_pct(&self) -> f64 {
        efficiency_gain(self.serial_lead_time_days, self.parallelized_lead_time_days)
    }
}

/// Clamp a serial/parallel pair so both are non-negative and the parallel
/// time never exceeds the serial time.
pub fn clamp_lead_times(serial: f64, parallelized: f64) -> (f64, f64) {
    let serial = if serial.is_finite() { serial.max(0.0) } else { 0.0 };
    let parallelized = if parallelized.is_finite() {
        parallelized.max(0.0)
    } else {
        0.0
    };
    (serial, parallelized.min(serial))
}

/// `serial - parallel`, never negative.
pub fn time_saved(serial: f64, parallel: f64) -> f64 {
    (serial - parallel).max(0.0)
}

/// Savings as a percentage of the serial time; 0 when serial is 0.
pub fn efficiency_gain(serial: f64, parallel: f64) -> f64 {
    if serial <= 0.0 {
        return 0.0;
    }
    time_saved(serial, parallel) / serial * 100.0
}

/// One side of a parallelization pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PairItem {
    pub item_code: String,
    pub urgency: Urgency,
    pub process: String,
    pub machines: String,
}

/// Two items evaluated for simultaneous execution. The pair is unordered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParallelizationPair {
    pub item_a: PairItem,
    pub item_b: PairItem,
    pub sequential_time_days: f64,
    pub parallel_time_days: f64,
    pub can_run_parallel: bool,
    #[serde(default)]
    pub process_conflicts: Vec<String>,
    #[serde(default)]
    pub machine_conflicts: Vec<String>,
}

impl ParallelizationPair {
    /// Order-independent key: `(min(code_a, code_b), max(code_a, code_b))`.
    pub fn key(&self) -> (String, String) {
        let a = &self.item_a.item_code;
        let b = &self.item_b.item_code;
        if a <= b {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        }
    }

    pub fn time_saved_days(&self) -> f64 {
        time_saved(self.sequential_time_days, self.parallel_time_days)
    }

    pub fn efficiency_gain_pct(&self) -> f64 {
        efficiency_gain(self.sequential_time_days, self.parallel_time_days)
    }

    pub fn has_conflicts(&self) -> bool {
        !self.process_conflicts.is_empty() || !self.machine_conflicts.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StockRecord {
    pub item_code: String,
    pub stock_adequacy: StockAdequacy,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Item counts per stock adequacy bucket.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StockCounts {
    pub out_of_stock: u64,
    pub shortage: u64,
    pub adequate: u64,
    pub excess: u64,
}

impl StockCounts {
    pub fn total(&self) -> u64 {
        self.out_of_stock + self.shortage + self.adequate + self.excess
    }
}

/// Machine counts per load bucket.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineLoad {
    pub overloaded: u64,
    pub high_load: u64,
    pub medium_load: u64,
    pub available: u64,
}

/// Scalar counters reported alongside the record collections.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    /// Keyed by `Stage::as_str()`.
    pub by_stage: BTreeMap<String, u64>,
    /// Keyed by `Urgency::as_str()`.
    pub by_urgency: BTreeMap<String, u64>,
    pub stock: StockCounts,
    pub machines: MachineLoad,
    pub total_jobs: u64,
}

/// Per-collection count of rows the normalizer set aside.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DropCounts {
    pub jobs: usize,
    pub lead_times: usize,
    pub stock: usize,
    pub pairs: usize,
}

impl DropCounts {
    pub fn total(&self) -> usize {
        self.jobs + self.lead_times + self.stock + self.pairs
    }
}

/// One internally consistent capture of everything the dashboard shows.
///
/// Always structurally complete: collections that could not be fetched are
/// empty, never missing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub summary: DashboardSummary,
    pub jobs: Vec<JobRecord>,
    pub lead_times: Vec<LeadTimeRecord>,
    pub stock: Vec<StockRecord>,
    pub pairs: Vec<ParallelizationPair>,
    /// Rows rejected for missing identity fields.
    #[serde(default)]
    pub dropped: DropCounts,
    /// Rows discarded as repeats of an earlier identity.
    #[serde(default)]
    pub duplicates: DropCounts,
    /// Endpoints whose fallback value was used for this capture.
    #[serde(default)]
    pub degraded: Vec<Endpoint>,
    pub captured_at: DateTime<Utc>,
}

impl DashboardSnapshot {
    pub fn empty(captured_at: DateTime<Utc>) -> Self {
        Self {
            summary: DashboardSummary::default(),
            jobs: Vec::new(),
            lead_times: Vec::new(),
            stock: Vec::new(),
            pairs: Vec::new(),
            dropped: DropCounts::default(),
            duplicates: DropCounts::default(),
            degraded: Vec::new(),
            captured_at,
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.degraded.is_empty()
    }
}

/// The one piece of state that survives a restart.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub etl_completed: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn efficiency_gain_for_ten_and_seven() {
        let record = LeadTimeRecord::new("ITM-1", 10.0, 7.0);
        assert!((record.time_saved_days() - 3.0).abs() < 1e-9);
        assert!((record.efficiency_gain_pct() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn zero_serial_has_zero_efficiency() {
        let record = LeadTimeRecord::new("ITM-2", 0.0, 0.0);
        assert_eq!(record.efficiency_gain_pct(), 0.0);
        assert_eq!(record.time_saved_days(), 0.0);
    }

    #[test]
    fn parallel_longer_than_serial_is_clamped() {
        let record = LeadTimeRecord::new("ITM-3", 5.0, 9.0);
        assert_eq!(record.parallelized_lead_time_days, 5.0);
        assert_eq!(record.time_saved_days(), 0.0);
    }

    #[test]
    fn vocabularies_fold_case_and_separators() {
        assert_eq!(Stage::from_raw("wip-raw"), Stage::WipRaw);
        assert_eq!(Stage::from_raw(" rfd "), Stage::Rfd);
        assert_eq!(Stage::from_raw("assembly"), Stage::Unknown);
        assert_eq!(Urgency::from_raw("critical"), Urgency::Critical);
        assert_eq!(Urgency::from_raw("urgent"), Urgency::Unknown);
        assert_eq!(StockAdequacy::from_raw("Out of Stock"), StockAdequacy::OutOfStock);
        assert_eq!(StockAdequacy::from_raw("out_of_stock"), StockAdequacy::OutOfStock);
        assert_eq!(StockAdequacy::from_raw("plenty"), StockAdequacy::Unknown);
    }

    #[test]
    fn pair_key_is_order_independent() {
        let item = |code: &str| PairItem {
            item_code: code.into(),
            urgency: Urgency::High,
            process: "Cutting".into(),
            machines: "M1".into(),
        };
        let forward = ParallelizationPair {
            item_a: item("B-2"),
            item_b: item("A-1"),
            sequential_time_days: 8.0,
            parallel_time_days: 5.0,
            can_run_parallel: true,
            process_conflicts: Vec::new(),
            machine_conflicts: Vec::new(),
        };
        let mut reversed = forward.clone();
        std::mem::swap(&mut reversed.item_a, &mut reversed.item_b);
        assert_eq!(forward.key(), reversed.key());
    }
}
