//! Search, filter, sort and page over any record collection.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::components::field_filter::FieldPredicateFilter;
use crate::components::page_selector::PageSelector;
use crate::components::search_filter::SearchFilter;
use crate::filter::Filter;
use crate::selector::Selector;
use crate::types::{JobRecord, LeadTimeRecord, ParallelizationPair, StockRecord};

/// Addressable record fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    ItemCode,
    Stage,
    Urgency,
    Process,
    Machines,
    Category,
    Priority,
    StockAdequacy,
    CanRunParallel,
    Quantity,
    LeadTimeEstimate,
    SerialDays,
    ParallelDays,
    TimeSaved,
    EfficiencyGain,
}

impl Field {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Field::Quantity
                | Field::LeadTimeEstimate
                | Field::SerialDays
                | Field::ParallelDays
                | Field::TimeSaved
                | Field::EfficiencyGain
        )
    }
}

/// Uniform field access for the query engine.
///
/// `text` returns every value the field has on the record: a pair has two
/// item codes and two urgencies, and matches a filter if either does.
pub trait Record: Clone + Send + Sync + 'static {
    fn text(&self, field: Field) -> Vec<&str>;

    fn number(&self, field: Field) -> Option<f64>;

    /// Fields the free-text search looks at.
    fn search_fields(&self) -> Vec<&str> {
        self.text(Field::ItemCode)
    }
}

fn bool_str(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

impl Record for JobRecord {
    fn text(&self, field: Field) -> Vec<&str> {
        match field {
            Field::ItemCode => vec![self.item_code.as_str()],
            Field::Stage => vec![self.stage.as_str()],
            Field::Urgency => vec![self.urgency.as_str()],
            Field::Process => vec![self.process.as_str()],
            _ => Vec::new(),
        }
    }

    fn number(&self, field: Field) -> Option<f64> {
        match field {
            Field::Quantity => Some(self.quantity),
            Field::LeadTimeEstimate => Some(self.lead_time_estimate_days),
            _ => None,
        }
    }

    fn search_fields(&self) -> Vec<&str> {
        vec![self.item_code.as_str(), self.process.as_str()]
    }
}

impl Record for LeadTimeRecord {
    fn text(&self, field: Field) -> Vec<&str> {
        match field {
            Field::ItemCode => vec![self.item_code.as_str()],
            Field::Category => vec![self.category.as_str()],
            Field::Priority => vec![self.priority.as_str()],
            Field::Stage => self.stage.iter().map(|s| s.as_str()).collect(),
            Field::Urgency => self.urgency.iter().map(|u| u.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    fn number(&self, field: Field) -> Option<f64> {
        match field {
            Field::SerialDays => Some(self.serial_lead_time_days),
            Field::ParallelDays => Some(self.parallelized_lead_time_days),
            Field::TimeSaved => Some(self.time_saved_days()),
            Field::EfficiencyGain => Some(self.efficiency_gain_pct()),
            _ => None,
        }
    }

    fn search_fields(&self) -> Vec<&str> {
        vec![self.item_code.as_str(), self.category.as_str()]
    }
}

impl Record for ParallelizationPair {
    fn text(&self, field: Field) -> Vec<&str> {
        match field {
            Field::ItemCode => vec![self.item_a.item_code.as_str(), self.item_b.item_code.as_str()],
            Field::Urgency => vec![self.item_a.urgency.as_str(), self.item_b.urgency.as_str()],
            Field::Process => vec![self.item_a.process.as_str(), self.item_b.process.as_str()],
            Field::Machines => vec![self.item_a.machines.as_str(), self.item_b.machines.as_str()],
            Field::CanRunParallel => vec![bool_str(self.can_run_parallel)],
            _ => Vec::new(),
        }
    }

    fn number(&self, field: Field) -> Option<f64> {
        match field {
            Field::SerialDays => Some(self.sequential_time_days),
            Field::ParallelDays => Some(self.parallel_time_days),
            Field::TimeSaved => Some(self.time_saved_days()),
            Field::EfficiencyGain => Some(self.efficiency_gain_pct()),
            _ => None,
        }
    }
}

impl Record for StockRecord {
    fn text(&self, field: Field) -> Vec<&str> {
        match field {
            Field::ItemCode => vec![self.item_code.as_str()],
            Field::StockAdequacy => vec![self.stock_adequacy.as_str()],
            _ => Vec::new(),
        }
    }

    fn number(&self, _field: Field) -> Option<f64> {
        None
    }
}

/// Condition applied to one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum Predicate {
    /// Case-insensitive exact match against any of the field's values.
    Equals(String),
    OneOf(Vec<String>),
    AtLeast(f64),
    AtMost(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: Field,
    pub predicate: Predicate,
}

impl FieldFilter {
    pub fn equals(field: Field, value: impl Into<String>) -> Self {
        Self {
            field,
            predicate: Predicate::Equals(value.into()),
        }
    }

    pub fn at_least(field: Field, value: f64) -> Self {
        Self {
            field,
            predicate: Predicate::AtLeast(value),
        }
    }

    pub fn at_most(field: Field, value: f64) -> Self {
        Self {
            field,
            predicate: Predicate::AtMost(value),
        }
    }

    pub fn matches<R: Record>(&self, record: &R) -> bool {
        match &self.predicate {
            Predicate::Equals(wanted) => record
                .text(self.field)
                .iter()
                .any(|v| v.eq_ignore_ascii_case(wanted)),
            Predicate::OneOf(options) => record
                .text(self.field)
                .iter()
                .any(|v| options.iter().any(|o| v.eq_ignore_ascii_case(o))),
            Predicate::AtLeast(min) => record.number(self.field).map(|n| n >= *min).unwrap_or(false),
            Predicate::AtMost(max) => record.number(self.field).map(|n| n <= *max).unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: Field,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn desc(field: Field) -> Self {
        Self {
            field,
            direction: SortDirection::Desc,
        }
    }

    pub fn asc(field: Field) -> Self {
        Self {
            field,
            direction: SortDirection::Asc,
        }
    }

    /// Column-header click: the same field flips direction, a new field
    /// starts descending.
    pub fn toggle(current: Option<SortSpec>, field: Field) -> SortSpec {
        match current {
            Some(spec) if spec.field == field => SortSpec {
                field,
                direction: match spec.direction {
                    SortDirection::Asc => SortDirection::Desc,
                    SortDirection::Desc => SortDirection::Asc,
                },
            },
            _ => SortSpec::desc(field),
        }
    }
}

/// Everything that determines a view. Pages are 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub filters: Vec<FieldFilter>,
    #[serde(default)]
    pub sort: Option<SortSpec>,
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    10
}

impl Default for QuerySpec {
    fn default() -> Self {
        Self {
            search: None,
            filters: Vec::new(),
            sort: None,
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

impl QuerySpec {
    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    pub fn filter(mut self, filter: FieldFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn page(mut self, page: usize, page_size: usize) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    /// Trimmed, lower-cased search term, if any.
    pub fn search_term(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
    }

    pub fn effective_page(&self) -> usize {
        self.page.max(1)
    }

    pub fn effective_page_size(&self) -> usize {
        self.page_size.max(1)
    }
}

/// One page of a view plus the counts needed to render pagination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<R> {
    pub items: Vec<R>,
    pub total_matching: usize,
    pub total_records: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

pub fn total_pages(total: usize, page_size: usize) -> usize {
    total.div_ceil(page_size.max(1)).max(1)
}

/// Filters, then the page selector.
pub struct QueryEngine<R: Record> {
    filters: Vec<Box<dyn Filter<QuerySpec, R>>>,
    selector: Box<dyn Selector<QuerySpec, R>>,
}

impl<R: Record> Default for QueryEngine<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> QueryEngine<R> {
    pub fn new() -> Self {
        Self {
            filters: vec![Box::new(SearchFilter), Box::new(FieldPredicateFilter)],
            selector: Box::new(PageSelector),
        }
    }

    /// Deterministic: equal inputs give equal pages. The input is not touched.
    pub fn run(&self, records: &[R], spec: &QuerySpec) -> Page<R> {
        let mut candidates = records.to_vec();
        for filter in &self.filters {
            if !filter.enable(spec) {
                continue;
            }
            let result = filter.filter(spec, candidates);
            log::trace!("filter={} removed={}", filter.name(), result.removed.len());
            candidates = result.kept;
        }
        let total_matching = candidates.len();
        let page_size = spec.effective_page_size();
        let items = self.selector.select(spec, candidates);
        Page {
            items,
            total_matching,
            total_records: records.len(),
            page: spec.effective_page(),
            page_size,
            total_pages: total_pages(total_matching, page_size),
        }
    }
}

/// Run the standard engine once.
pub fn run_query<R: Record>(records: &[R], spec: &QuerySpec) -> Page<R> {
    QueryEngine::new().run(records, spec)
}

// ---------------------------------------------------------------------------
// Filter tiers
// ---------------------------------------------------------------------------

/// Where a filter is applied for server-paginated collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterTier {
    /// Sent to the API; changing it re-issues the page request.
    Server,
    /// Applied to the loaded page; no round-trip.
    Client,
}

/// User-facing filter controls of the lead-time view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKey {
    Search,
    Stage,
    Urgency,
    Category,
    Priority,
    MinEfficiency,
}

impl FilterKey {
    pub const ALL: [FilterKey; 6] = [
        FilterKey::Search,
        FilterKey::Stage,
        FilterKey::Urgency,
        FilterKey::Category,
        FilterKey::Priority,
        FilterKey::MinEfficiency,
    ];

    pub fn tier(&self) -> FilterTier {
        match self {
            FilterKey::Stage | FilterKey::Urgency => FilterTier::Server,
            FilterKey::Search
            | FilterKey::Category
            | FilterKey::Priority
            | FilterKey::MinEfficiency => FilterTier::Client,
        }
    }
}

impl fmt::Display for FilterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterKey::Search => "search",
            FilterKey::Stage => "stage",
            FilterKey::Urgency => "urgency",
            FilterKey::Category => "category",
            FilterKey::Priority => "priority",
            FilterKey::MinEfficiency => "min_efficiency",
        };
        f.write_str(name)
    }
}
