//! Maps raw upstream JSON onto the canonical record types.
//!
//! The API has drifted over time: the same field shows up as `ITEM_CODE`,
//! `item_code` or `itemCode`, envelopes are sometimes `{"data": [...]}`,
//! sometimes a bare array, and numbers arrive as strings. All of that is
//! absorbed here so nothing downstream ever sees a raw payload.
//!
//! Every function is pure and total: bad input yields defaults or a dropped
//! record, never a panic or a `NaN`.

use std::collections::{BTreeMap, HashSet};

use serde_json::{Map, Value};

use crate::types::{
    clamp_lead_times, DashboardSummary, JobRecord, LeadTimeRecord, MachineLoad, PairItem,
    ParallelizationPair, Stage, StockAdequacy, StockCounts, StockRecord, Urgency,
    DEFAULT_CATEGORY, DEFAULT_PRIORITY,
};

// Alias lists, most specific first. Matching goes through `canonical_key`,
// so each entry already covers its SCREAMING_CASE and camelCase spellings.
const ITEM_CODE: &[&str] = &["item_code", "item", "sku"];
const STAGE: &[&str] = &["stage", "current_stage"];
const PROCESS: &[&str] = &["process", "process_name", "operation"];
const QUANTITY: &[&str] = &["quantity", "qty"];
const URGENCY: &[&str] = &["urgency", "urgency_tag", "urgency_level"];
const LEAD_TIME_ESTIMATE: &[&str] = &["lead_time_estimate", "lead_time_estimate_days", "lead_time"];
const SERIAL: &[&str] = &["lead_time_serial", "serial_lead_time_days", "current_days"];
const PARALLELIZED: &[&str] = &[
    "lead_time_parallelized",
    "parallelized_lead_time_days",
    "optimized_days",
];
const CATEGORY: &[&str] = &["category"];
const PRIORITY: &[&str] = &["priority"];
const STOCK_ADEQUACY: &[&str] = &["stock_adequacy", "stock_status", "adequacy"];
const ITEM_A: &[&str] = &["item_1", "item_a", "item_1_code"];
const ITEM_B: &[&str] = &["item_2", "item_b", "item_2_code"];
const SEQUENTIAL: &[&str] = &["sequential_time_days", "sequential_time", "sequential_days"];
const PARALLEL: &[&str] = &["parallel_time_days", "parallel_time", "parallel_days"];
const CAN_RUN_PARALLEL: &[&str] = &["can_run_parallel", "parallelizable"];
const PROCESS_CONFLICTS: &[&str] = &["process_conflicts"];
const MACHINE_CONFLICTS: &[&str] = &["machine_conflicts"];
const TOTAL: &[&str] = &["total", "total_count", "count"];

/// Output of normalizing one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBatch<T> {
    pub records: Vec<T>,
    /// Rows in the payload before validation.
    pub raw_count: usize,
    /// Rows rejected for missing identity fields.
    pub dropped: usize,
    /// Rows discarded because an earlier row had the same identity.
    pub duplicates: usize,
}

impl<T> Default for NormalizedBatch<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            raw_count: 0,
            dropped: 0,
            duplicates: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Field access
// ---------------------------------------------------------------------------

/// Lower-case a key and strip `_`, `-` and spaces.
pub fn canonical_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// First non-null value whose key matches one of `aliases`.
pub fn lookup<'a>(object: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    for alias in aliases {
        let wanted = canonical_key(alias);
        let hit = object
            .iter()
            .find(|(key, value)| !value.is_null() && canonical_key(key) == wanted)
            .map(|(_, value)| value);
        if hit.is_some() {
            return hit;
        }
    }
    None
}

/// Numbers and numeric strings become finite `f64`; everything else is 0.
pub fn safe_number(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    match parsed {
        Some(n) if n.is_finite() => n,
        _ => 0.0,
    }
}

/// `safe_number` clamped to `>= 0`.
pub fn non_negative(value: Option<&Value>) -> f64 {
    safe_number(value).max(0.0)
}

/// Trimmed string form of a scalar; `None` for empty, null or composite values.
pub fn text(value: Option<&Value>) -> Option<String> {
    let raw = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if raw.is_empty() {
        None
    } else {
        Some(raw)
    }
}

/// Flexible bool: handles JSON bools, 0/1 and "true"/"yes"/"y".
pub fn flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        Some(Value::String(s)) => matches!(
            s.trim().to_lowercase().as_str(),
            "true" | "1" | "yes" | "y"
        ),
        _ => false,
    }
}

/// Conflict lists arrive either as arrays or as comma-separated strings.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(|v| text(Some(v))).collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// Row list of a collection response: a bare array, or the array under
/// `data`, `rows`, `items` or `results`. Anything else yields no rows.
pub fn unwrap_rows(payload: &Value) -> &[Value] {
    match payload {
        Value::Array(rows) => rows,
        Value::Object(object) => {
            for key in ["data", "rows", "items", "results"] {
                if let Some(Value::Array(rows)) = object.get(key) {
                    return rows;
                }
            }
            &[]
        }
        _ => &[],
    }
}

/// Object of a summary response: the object under `summary` when present,
/// otherwise the payload itself.
pub fn unwrap_object(payload: &Value) -> Option<&Map<String, Value>> {
    let object = payload.as_object()?;
    match object.get("summary") {
        Some(Value::Object(inner)) => Some(inner),
        _ => Some(object),
    }
}

fn normalize_rows<T, K>(
    payload: &Value,
    normalize: impl Fn(&Map<String, Value>) -> Option<T>,
    identity: impl Fn(&T) -> Option<K>,
) -> NormalizedBatch<T>
where
    K: std::hash::Hash + Eq,
{
    let rows = unwrap_rows(payload);
    let mut batch = NormalizedBatch {
        raw_count: rows.len(),
        ..NormalizedBatch::default()
    };
    let mut seen = HashSet::new();
    for row in rows {
        let Some(record) = row.as_object().and_then(&normalize) else {
            batch.dropped += 1;
            continue;
        };
        if let Some(key) = identity(&record) {
            if !seen.insert(key) {
                batch.duplicates += 1;
                continue;
            }
        }
        batch.records.push(record);
    }
    batch
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

pub fn normalize_job(object: &Map<String, Value>) -> Option<JobRecord> {
    let item_code = text(lookup(object, ITEM_CODE))?;
    Some(JobRecord {
        item_code,
        stage: text(lookup(object, STAGE))
            .map(|s| Stage::from_raw(&s))
            .unwrap_or(Stage::Unknown),
        process: text(lookup(object, PROCESS)).unwrap_or_default(),
        quantity: non_negative(lookup(object, QUANTITY)),
        urgency: text(lookup(object, URGENCY))
            .map(|s| Urgency::from_raw(&s))
            .unwrap_or(Urgency::Unknown),
        lead_time_estimate_days: non_negative(lookup(object, LEAD_TIME_ESTIMATE)),
    })
}

pub fn normalize_lead_time(object: &Map<String, Value>) -> Option<LeadTimeRecord> {
    let item_code = text(lookup(object, ITEM_CODE))?;
    let (serial, parallelized) = clamp_lead_times(
        safe_number(lookup(object, SERIAL)),
        safe_number(lookup(object, PARALLELIZED)),
    );
    Some(LeadTimeRecord {
        item_code,
        serial_lead_time_days: serial,
        parallelized_lead_time_days: parallelized,
        category: text(lookup(object, CATEGORY)).unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        priority: text(lookup(object, PRIORITY)).unwrap_or_else(|| DEFAULT_PRIORITY.to_string()),
        stage: text(lookup(object, STAGE)).map(|s| Stage::from_raw(&s)),
        urgency: text(lookup(object, URGENCY)).map(|s| Urgency::from_raw(&s)),
    })
}

pub fn normalize_stock(object: &Map<String, Value>) -> Option<StockRecord> {
    let item_code = text(lookup(object, ITEM_CODE))?;
    Some(StockRecord {
        item_code,
        stock_adequacy: text(lookup(object, STOCK_ADEQUACY))
            .map(|s| StockAdequacy::from_raw(&s))
            .unwrap_or(StockAdequacy::Unknown),
    })
}

fn pair_item(object: &Map<String, Value>, code_aliases: &[&str], prefix: &str) -> Option<PairItem> {
    let field = |suffix: &str| format!("{prefix}_{suffix}");
    Some(PairItem {
        item_code: text(lookup(object, code_aliases))?,
        urgency: text(lookup(object, &[field("urgency").as_str()]))
            .map(|s| Urgency::from_raw(&s))
            .unwrap_or(Urgency::Unknown),
        process: text(lookup(object, &[field("process").as_str()])).unwrap_or_default(),
        machines: text(lookup(object, &[field("machines").as_str()])).unwrap_or_default(),
    })
}

pub fn normalize_pair(object: &Map<String, Value>) -> Option<ParallelizationPair> {
    let item_a = pair_item(object, ITEM_A, "item_1")?;
    let item_b = pair_item(object, ITEM_B, "item_2")?;
    let (sequential, parallel) = clamp_lead_times(
        safe_number(lookup(object, SEQUENTIAL)),
        safe_number(lookup(object, PARALLEL)),
    );
    Some(ParallelizationPair {
        item_a,
        item_b,
        sequential_time_days: sequential,
        parallel_time_days: parallel,
        can_run_parallel: flag(lookup(object, CAN_RUN_PARALLEL)),
        process_conflicts: string_list(lookup(object, PROCESS_CONFLICTS)),
        machine_conflicts: string_list(lookup(object, MACHINE_CONFLICTS)),
    })
}

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

/// Jobs, deduplicated on `(item_code, stage, process)`.
pub fn normalize_jobs(payload: &Value) -> NormalizedBatch<JobRecord> {
    normalize_rows(payload, normalize_job, |job| Some(job.identity()))
}

pub fn normalize_lead_times(payload: &Value) -> NormalizedBatch<LeadTimeRecord> {
    normalize_rows(payload, normalize_lead_time, |_| None::<()>)
}

pub fn normalize_stock_rows(payload: &Value) -> NormalizedBatch<StockRecord> {
    normalize_rows(payload, normalize_stock, |_| None::<()>)
}

/// Pairs, deduplicated on the unordered item-code key.
pub fn normalize_pairs(payload: &Value) -> NormalizedBatch<ParallelizationPair> {
    normalize_rows(payload, normalize_pair, |pair| Some(pair.key()))
}

/// One server page of lead times plus the server's total row count.
///
/// When the response carries no total, the page length stands in for it.
pub fn normalize_lead_time_page(payload: &Value) -> (NormalizedBatch<LeadTimeRecord>, u64) {
    let batch = normalize_lead_times(payload);
    let total = payload
        .as_object()
        .and_then(|object| lookup(object, TOTAL))
        .map(|value| non_negative(Some(value)) as u64)
        .unwrap_or(batch.raw_count as u64);
    (batch, total)
}

fn counter_map(value: Option<&Value>, canonical: impl Fn(&str) -> String) -> BTreeMap<String, u64> {
    let mut counters = BTreeMap::new();
    if let Some(Value::Object(object)) = value {
        for (key, count) in object {
            *counters.entry(canonical(key)).or_insert(0) += non_negative(Some(count)) as u64;
        }
    }
    counters
}

fn counter(object: Option<&Map<String, Value>>, aliases: &[&str]) -> u64 {
    object
        .map(|o| non_negative(lookup(o, aliases)) as u64)
        .unwrap_or(0)
}

/// The summary payload: scalar counters plus the embedded job list.
///
/// Jobs are read from `jobs.all_jobs`, falling back to a top-level
/// `all_jobs`. Job counters absent from the payload are tallied from the raw
/// rows, so rows the normalizer rejects still count towards the totals.
pub fn normalize_summary(payload: &Value) -> (DashboardSummary, NormalizedBatch<JobRecord>) {
    let Some(object) = unwrap_object(payload) else {
        return (DashboardSummary::default(), NormalizedBatch::default());
    };
    let jobs_section = object.get("jobs").and_then(Value::as_object);

    let all_jobs = jobs_section
        .and_then(|jobs| jobs.get("all_jobs"))
        .or_else(|| object.get("all_jobs"))
        .cloned()
        .unwrap_or(Value::Null);
    let jobs = normalize_jobs(&all_jobs);

    let stock_section = object.get("stock").and_then(Value::as_object);
    let machine_section = object.get("machines").and_then(Value::as_object);

    let mut summary = DashboardSummary {
        by_stage: counter_map(jobs_section.and_then(|j| j.get("by_stage")), |k| {
            Stage::from_raw(k).as_str().to_string()
        }),
        by_urgency: counter_map(jobs_section.and_then(|j| j.get("by_urgency")), |k| {
            Urgency::from_raw(k).as_str().to_string()
        }),
        stock: StockCounts {
            out_of_stock: counter(stock_section, &["out_of_stock"]),
            shortage: counter(stock_section, &["shortage"]),
            adequate: counter(stock_section, &["adequate"]),
            excess: counter(stock_section, &["excess"]),
        },
        machines: MachineLoad {
            overloaded: counter(machine_section, &["overloaded"]),
            high_load: counter(machine_section, &["high_load"]),
            medium_load: counter(machine_section, &["medium_load"]),
            available: counter(machine_section, &["available"]),
        },
        total_jobs: counter(jobs_section, &["total", "total_jobs"]),
    };
    let raw_rows = unwrap_rows(&all_jobs);
    if summary.total_jobs == 0 {
        summary.total_jobs = jobs.raw_count as u64;
    }
    if summary.by_stage.is_empty() {
        summary.by_stage = raw_tally(raw_rows, STAGE, |s| Stage::from_raw(s).as_str());
    }
    if summary.by_urgency.is_empty() {
        summary.by_urgency = raw_tally(raw_rows, URGENCY, |s| Urgency::from_raw(s).as_str());
    }
    (summary, jobs)
}

/// Count raw rows per canonical value of one field. Rows without the field,
/// or that are not objects, land under `UNKNOWN`.
fn raw_tally(
    rows: &[Value],
    aliases: &[&str],
    canonical: impl Fn(&str) -> &'static str,
) -> BTreeMap<String, u64> {
    let mut tally = BTreeMap::new();
    for row in rows {
        let label = row
            .as_object()
            .and_then(|object| text(lookup(object, aliases)))
            .map(|raw| canonical(&raw))
            .unwrap_or_else(|| canonical(""));
        *tally.entry(label.to_string()).or_insert(0) += 1;
    }
    tally
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn item_code_aliases_all_resolve() {
        for key in ["ITEM_CODE", "item_code", "itemCode", "Item-Code"] {
            let row = object(json!({ key: "ITM-7", "LEAD_TIME_SERIAL": 4 }));
            let record = normalize_lead_time(&row).unwrap();
            assert_eq!(record.item_code, "ITM-7", "alias {key}");
        }
    }

    #[test]
    fn first_non_null_alias_wins() {
        let row = object(json!({
            "LEAD_TIME_SERIAL": null,
            "current_days": "12.5",
            "optimized_days": 10,
            "ITEM_CODE": "A"
        }));
        let record = normalize_lead_time(&row).unwrap();
        assert_eq!(record.serial_lead_time_days, 12.5);
        assert_eq!(record.parallelized_lead_time_days, 10.0);
        assert_eq!(record.category, "General");
        assert_eq!(record.priority, "Medium");
        assert_eq!(record.stage, None);
    }

    #[test]
    fn safe_number_rejects_garbage() {
        assert_eq!(safe_number(Some(&json!("abc"))), 0.0);
        assert_eq!(safe_number(Some(&json!("NaN"))), 0.0);
        assert_eq!(safe_number(Some(&json!("inf"))), 0.0);
        assert_eq!(safe_number(Some(&json!(" 3.5 "))), 3.5);
        assert_eq!(safe_number(Some(&json!([1]))), 0.0);
        assert_eq!(safe_number(None), 0.0);
        assert_eq!(non_negative(Some(&json!(-4))), 0.0);
    }

    #[test]
    fn job_enums_fall_back_to_unknown() {
        let row = object(json!({
            "ITEM_CODE": "J-1",
            "STAGE": "wip-mc",
            "PROCESS": "Drilling",
            "QUANTITY": -3,
            "URGENCY": "whenever",
            "LEAD_TIME_ESTIMATE": "2"
        }));
        let job = normalize_job(&row).unwrap();
        assert_eq!(job.stage, Stage::WipMc);
        assert_eq!(job.urgency, Urgency::Unknown);
        assert_eq!(job.quantity, 0.0);
        assert_eq!(job.lead_time_estimate_days, 2.0);
    }

    #[test]
    fn envelopes_unwrap() {
        let wrapped = json!({ "data": [{ "item_code": "A" }, { "item_code": "B" }] });
        let bare = json!([{ "item_code": "A" }]);
        assert_eq!(normalize_stock_rows(&wrapped).records.len(), 2);
        assert_eq!(normalize_stock_rows(&bare).records.len(), 1);
        assert!(normalize_stock_rows(&json!("nope")).records.is_empty());
        assert!(normalize_stock_rows(&json!({ "data": null })).records.is_empty());
    }

    #[test]
    fn rows_without_identity_are_dropped_and_counted() {
        let payload = json!({ "data": [
            { "ITEM_CODE": "A", "STOCK_ADEQUACY": "Out of Stock" },
            { "STOCK_ADEQUACY": "Excess" },
            "not an object",
            { "ITEM_CODE": "  " }
        ]});
        let batch = normalize_stock_rows(&payload);
        assert_eq!(batch.raw_count, 4);
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.dropped, 3);
        assert_eq!(batch.records[0].stock_adequacy, StockAdequacy::OutOfStock);
    }

    #[test]
    fn jobs_dedupe_on_identity_triple() {
        let payload = json!([
            { "ITEM_CODE": "A", "STAGE": "RFM", "PROCESS": "Cut", "QUANTITY": 1 },
            { "ITEM_CODE": "A", "STAGE": "RFM", "PROCESS": "Cut", "QUANTITY": 9 },
            { "ITEM_CODE": "A", "STAGE": "RFD", "PROCESS": "Cut", "QUANTITY": 2 }
        ]);
        let batch = normalize_jobs(&payload);
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.duplicates, 1);
        assert_eq!(batch.records[0].quantity, 1.0);
    }

    #[test]
    fn pairs_need_both_codes_and_dedupe_unordered() {
        let payload = json!({ "data": [
            {
                "ITEM_1": "A", "ITEM_2": "B",
                "ITEM_1_URGENCY": "HIGH", "ITEM_2_URGENCY": "low",
                "ITEM_1_MACHINES": "M1", "ITEM_2_MACHINES": "M2",
                "SEQUENTIAL_TIME_DAYS": 10, "PARALLEL_TIME_DAYS": 6,
                "CAN_RUN_PARALLEL": true,
                "MACHINE_CONFLICTS": "M3, M4"
            },
            { "ITEM_1": "B", "ITEM_2": "A", "CAN_RUN_PARALLEL": "yes" },
            { "ITEM_1": "C" }
        ]});
        let batch = normalize_pairs(&payload);
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.duplicates, 1);
        assert_eq!(batch.dropped, 1);
        let pair = &batch.records[0];
        assert_eq!(pair.item_b.urgency, Urgency::Low);
        assert_eq!(pair.item_a.machines, "M1");
        assert_eq!(pair.machine_conflicts, vec!["M3", "M4"]);
        assert!((pair.time_saved_days() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn missing_parallel_flag_means_not_runnable() {
        let row = object(json!({ "ITEM_1": "A", "ITEM_2": "B" }));
        assert!(!normalize_pair(&row).unwrap().can_run_parallel);
    }

    #[test]
    fn lead_time_page_reads_total_or_falls_back() {
        let payload = json!({ "data": [{ "ITEM_CODE": "A" }], "total": 42 });
        let (batch, total) = normalize_lead_time_page(&payload);
        assert_eq!(batch.records.len(), 1);
        assert_eq!(total, 42);

        let (_, total) = normalize_lead_time_page(&json!([{ "ITEM_CODE": "A" }, {}]));
        assert_eq!(total, 2);
    }

    #[test]
    fn summary_reads_nested_counters_and_jobs() {
        let payload = json!({
            "summary": {
                "jobs": {
                    "total": 3,
                    "all_jobs": [
                        { "ITEM_CODE": "A", "STAGE": "RFM", "URGENCY": "CRITICAL" },
                        { "ITEM_CODE": "B", "STAGE": "RFD", "URGENCY": "LOW" }
                    ],
                    "by_stage": { "RFM": 1, "rfd": 2 },
                    "by_urgency": { "CRITICAL": 1 }
                },
                "stock": { "out_of_stock": 4, "shortage": "2", "adequate": 7, "excess": 1 },
                "machines": { "overloaded": 1, "high_load": 2, "medium_load": 3, "available": 4 }
            }
        });
        let (summary, jobs) = normalize_summary(&payload);
        assert_eq!(jobs.records.len(), 2);
        assert_eq!(summary.total_jobs, 3);
        assert_eq!(summary.by_stage.get("RFD"), Some(&2));
        assert_eq!(summary.by_urgency.get("CRITICAL"), Some(&1));
        assert_eq!(summary.stock.shortage, 2);
        assert_eq!(summary.stock.total(), 14);
        assert_eq!(summary.machines.available, 4);
    }

    #[test]
    fn summary_of_non_object_is_empty() {
        let (summary, jobs) = normalize_summary(&json!(null));
        assert_eq!(summary, DashboardSummary::default());
        assert!(jobs.records.is_empty());
    }
}
