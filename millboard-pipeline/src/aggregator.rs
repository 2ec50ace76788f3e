use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::api::DashboardApi;
use crate::clock::Clock;
use crate::components::endpoint_source::EndpointSource;
use crate::error::{FetchError, RefreshError};
use crate::normalizer;
use crate::source::Source;
use crate::types::{DashboardSnapshot, DashboardSummary, DropCounts, Endpoint, StockAdequacy};

/// How complete a successful refresh was.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RefreshStatus {
    Full,
    Partial { failed: Vec<Endpoint> },
}

#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub snapshot: DashboardSnapshot,
    pub status: RefreshStatus,
}

/// Fans out to every data endpoint, substitutes fallbacks for the ones that
/// fail and assembles a single snapshot.
pub struct Aggregator {
    api: Arc<dyn DashboardApi>,
    sources: Vec<Box<dyn Source>>,
    clock: Arc<dyn Clock>,
}

impl Aggregator {
    /// The four data endpoints the dashboard reads.
    pub fn standard(api: Arc<dyn DashboardApi>, clock: Arc<dyn Clock>) -> Self {
        let sources: Vec<Box<dyn Source>> = [
            Endpoint::Summary,
            Endpoint::LeadTimes,
            Endpoint::StockStatus,
            Endpoint::ParallelizationPairs,
        ]
        .into_iter()
        .map(|endpoint| Box::new(EndpointSource::new(api.clone(), endpoint)) as Box<dyn Source>)
        .collect();
        Self::new(api, sources, clock)
    }

    pub fn new(api: Arc<dyn DashboardApi>, sources: Vec<Box<dyn Source>>, clock: Arc<dyn Clock>) -> Self {
        Self { api, sources, clock }
    }

    pub fn api(&self) -> &Arc<dyn DashboardApi> {
        &self.api
    }

    /// Run one refresh cycle.
    ///
    /// The health probe gates the cycle: if it fails nothing else is
    /// requested and the caller keeps whatever it already has.
    pub async fn refresh(&self, cancel: &CancellationToken) -> Result<RefreshOutcome, RefreshError> {
        let captured_at = self.clock.now();
        let started = Instant::now();

        if let Err(e) = self.api.probe(cancel).await {
            if e.is_cancelled() {
                return Err(RefreshError::Cancelled);
            }
            log::warn!("health probe failed: {e}");
            return Err(RefreshError::Unreachable(e.to_string()));
        }

        let results: Vec<Result<Value, FetchError>> =
            join_all(self.sources.iter().map(|source| source.fetch(cancel))).await;

        if cancel.is_cancelled() {
            return Err(RefreshError::Cancelled);
        }

        let mut payloads = BTreeMap::new();
        let mut failed = Vec::new();
        for (source, result) in self.sources.iter().zip(results) {
            let payload = match result {
                Ok(body) => body,
                Err(e) => {
                    log::warn!("endpoint={} failed, using fallback: {e}", source.name());
                    failed.push(source.endpoint());
                    source.fallback()
                }
            };
            payloads.insert(source.endpoint(), payload);
        }

        if !self.sources.is_empty() && failed.len() == self.sources.len() {
            return Err(RefreshError::AllEndpointsFailed(failed.len()));
        }

        let snapshot = assemble(&payloads, failed.clone(), captured_at);
        log::info!(
            "refresh complete jobs={} lead_times={} stock={} pairs={} dropped={} degraded={} elapsed_ms={}",
            snapshot.jobs.len(),
            snapshot.lead_times.len(),
            snapshot.stock.len(),
            snapshot.pairs.len(),
            snapshot.dropped.total(),
            failed.len(),
            started.elapsed().as_millis()
        );

        let status = if failed.is_empty() {
            RefreshStatus::Full
        } else {
            RefreshStatus::Partial { failed }
        };
        Ok(RefreshOutcome { snapshot, status })
    }
}

/// Normalize every payload and build the snapshot. Missing payloads are
/// treated as empty collections.
pub fn assemble(
    payloads: &BTreeMap<Endpoint, Value>,
    degraded: Vec<Endpoint>,
    captured_at: DateTime<Utc>,
) -> DashboardSnapshot {
    let empty = Value::Null;
    let payload = |endpoint: Endpoint| payloads.get(&endpoint).unwrap_or(&empty);

    let (mut summary, jobs) = normalizer::normalize_summary(payload(Endpoint::Summary));
    let lead_times = normalizer::normalize_lead_times(payload(Endpoint::LeadTimes));
    let stock = normalizer::normalize_stock_rows(payload(Endpoint::StockStatus));
    let pairs = normalizer::normalize_pairs(payload(Endpoint::ParallelizationPairs));

    let mut snapshot = DashboardSnapshot {
        summary: DashboardSummary::default(),
        jobs: jobs.records,
        lead_times: lead_times.records,
        stock: stock.records,
        pairs: pairs.records,
        dropped: DropCounts {
            jobs: jobs.dropped,
            lead_times: lead_times.dropped,
            stock: stock.dropped,
            pairs: pairs.dropped,
        },
        duplicates: DropCounts {
            jobs: jobs.duplicates,
            lead_times: lead_times.duplicates,
            stock: stock.duplicates,
            pairs: pairs.duplicates,
        },
        degraded,
        captured_at,
    };
    backfill_summary(&mut summary, &snapshot);
    snapshot.summary = summary;
    snapshot
}

/// Fill stock counters the summary payload left empty from the records.
/// Job counters are already tallied from the raw rows by the normalizer.
fn backfill_summary(summary: &mut DashboardSummary, snapshot: &DashboardSnapshot) {
    if summary.stock.total() == 0 {
        for record in &snapshot.stock {
            match record.stock_adequacy {
                StockAdequacy::OutOfStock => summary.stock.out_of_stock += 1,
                StockAdequacy::Shortage => summary.stock.shortage += 1,
                StockAdequacy::Adequate => summary.stock.adequate += 1,
                StockAdequacy::Excess => summary.stock.excess += 1,
                StockAdequacy::Unknown => {}
            }
        }
    }
}
