//! Server-paginated lead-time view.
//!
//! Stage, urgency and the page number go to the API; search, category,
//! priority and the efficiency floor are applied to the loaded page only.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::api::{DashboardApi, QueryParams};
use crate::error::FetchError;
use crate::normalizer;
use crate::query::{run_query, total_pages, Field, FieldFilter, FilterKey, FilterTier, QuerySpec, SortSpec};
use crate::types::{Endpoint, LeadTimeRecord, Stage, Urgency};

/// A change to one filter control. `None` clears it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "key", content = "value", rename_all = "snake_case")]
pub enum FilterChange {
    Search(Option<String>),
    Stage(Option<Stage>),
    Urgency(Option<Urgency>),
    Category(Option<String>),
    Priority(Option<String>),
    MinEfficiency(Option<f64>),
}

impl FilterChange {
    pub fn key(&self) -> FilterKey {
        match self {
            FilterChange::Search(_) => FilterKey::Search,
            FilterChange::Stage(_) => FilterKey::Stage,
            FilterChange::Urgency(_) => FilterKey::Urgency,
            FilterChange::Category(_) => FilterKey::Category,
            FilterChange::Priority(_) => FilterKey::Priority,
            FilterChange::MinEfficiency(_) => FilterKey::MinEfficiency,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerFilters {
    pub stage: Option<Stage>,
    pub urgency: Option<Urgency>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientFilters {
    pub search: Option<String>,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub min_efficiency: Option<f64>,
}

/// What the lead-time table renders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadTimeView {
    pub rows: Vec<LeadTimeRecord>,
    /// Rows on the loaded server page before client filters.
    pub loaded: usize,
    /// Matching rows across all server pages.
    pub server_total: u64,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

pub struct LeadTimeBrowser {
    server: ServerFilters,
    client: ClientFilters,
    sort: Option<SortSpec>,
    page: usize,
    page_size: usize,
    loaded: Vec<LeadTimeRecord>,
    server_total: u64,
    dirty: bool,
    server_requests: usize,
}

impl LeadTimeBrowser {
    pub fn new(page_size: usize) -> Self {
        Self {
            server: ServerFilters::default(),
            client: ClientFilters::default(),
            sort: Some(SortSpec::desc(Field::TimeSaved)),
            page: 1,
            page_size: page_size.max(1),
            loaded: Vec::new(),
            server_total: 0,
            dirty: true,
            server_requests: 0,
        }
    }

    pub fn server_filters(&self) -> &ServerFilters {
        &self.server
    }

    pub fn client_filters(&self) -> &ClientFilters {
        &self.client
    }

    /// Whether the next `sync` will hit the network.
    pub fn needs_fetch(&self) -> bool {
        self.dirty
    }

    pub fn server_requests(&self) -> usize {
        self.server_requests
    }

    /// Apply a filter change. Returns true when it invalidates the loaded
    /// page. A server-tier change also jumps back to page 1.
    pub fn set_filter(&mut self, change: FilterChange) -> bool {
        let tier = change.key().tier();
        let changed = match change {
            FilterChange::Stage(v) => replace(&mut self.server.stage, v),
            FilterChange::Urgency(v) => replace(&mut self.server.urgency, v),
            FilterChange::Search(v) => replace(&mut self.client.search, v),
            FilterChange::Category(v) => replace(&mut self.client.category, v),
            FilterChange::Priority(v) => replace(&mut self.client.priority, v),
            FilterChange::MinEfficiency(v) => replace(&mut self.client.min_efficiency, v),
        };
        if changed && tier == FilterTier::Server {
            self.page = 1;
            self.dirty = true;
        }
        changed && tier == FilterTier::Server
    }

    pub fn set_sort(&mut self, sort: Option<SortSpec>) {
        self.sort = sort;
    }

    pub fn sort(&self) -> Option<SortSpec> {
        self.sort
    }

    /// Force the next `sync` to refetch, e.g. after the ETL reran upstream.
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    pub fn set_page(&mut self, page: usize) -> bool {
        let page = page.max(1);
        if page != self.page {
            self.page = page;
            self.dirty = true;
        }
        self.dirty
    }

    pub fn set_page_size(&mut self, page_size: usize) -> bool {
        let page_size = page_size.max(1);
        if page_size != self.page_size {
            self.page_size = page_size;
            self.page = 1;
            self.dirty = true;
        }
        self.dirty
    }

    /// Parameters of the server request for the current state.
    pub fn request_params(&self) -> QueryParams {
        let mut params = vec![
            ("page".to_string(), self.page.to_string()),
            ("page_size".to_string(), self.page_size.to_string()),
        ];
        if let Some(stage) = self.server.stage {
            params.push(("stage".to_string(), stage.as_str().to_string()));
        }
        if let Some(urgency) = self.server.urgency {
            params.push(("urgency".to_string(), urgency.as_str().to_string()));
        }
        params
    }

    /// Fetch the current server page if anything server-side changed.
    /// Returns whether a request was made. On failure the previously
    /// loaded page stays in place and the browser stays dirty.
    pub async fn sync(
        &mut self,
        api: &dyn DashboardApi,
        cancel: &CancellationToken,
    ) -> Result<bool, FetchError> {
        if !self.dirty {
            return Ok(false);
        }
        let params = self.request_params();
        self.server_requests += 1;
        let body = api.get_json(Endpoint::LeadTimes, &params, cancel).await?;
        let (batch, total) = normalizer::normalize_lead_time_page(&body);
        if batch.dropped > 0 {
            log::debug!("lead time page dropped={} rows", batch.dropped);
        }
        self.loaded = batch.records;
        self.server_total = total;
        self.dirty = false;
        Ok(true)
    }

    fn client_query(&self) -> QuerySpec {
        let mut spec = QuerySpec {
            search: self.client.search.clone(),
            sort: self.sort,
            page: 1,
            page_size: self.loaded.len().max(1),
            ..QuerySpec::default()
        };
        if let Some(category) = &self.client.category {
            spec.filters.push(FieldFilter::equals(Field::Category, category.clone()));
        }
        if let Some(priority) = &self.client.priority {
            spec.filters.push(FieldFilter::equals(Field::Priority, priority.clone()));
        }
        if let Some(min) = self.client.min_efficiency {
            spec.filters.push(FieldFilter::at_least(Field::EfficiencyGain, min));
        }
        spec
    }

    /// The loaded page with client filters and sort applied.
    pub fn view(&self) -> LeadTimeView {
        let page = run_query(&self.loaded, &self.client_query());
        LeadTimeView {
            rows: page.items,
            loaded: self.loaded.len(),
            server_total: self.server_total,
            page: self.page,
            page_size: self.page_size,
            total_pages: total_pages(self.server_total as usize, self.page_size),
        }
    }
}

fn replace<T: PartialEq>(slot: &mut Option<T>, value: Option<T>) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}
