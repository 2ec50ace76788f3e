//! Pipeline-state controller.
//!
//! Owns the in-memory snapshot and decides, per transition, whether to serve
//! the cache, hit the network or send the user back to the upload step.
//!
//! | phase            | event                          | next                         |
//! |------------------|--------------------------------|------------------------------|
//! | (cold start)     | flag unset                     | AwaitingUpload               |
//! | (cold start)     | flag set, cache fresh          | Ready (no network)           |
//! | (cold start)     | flag set, refresh ok           | Ready                        |
//! | (cold start)     | flag set, refresh fails, stale | Ready + stale                |
//! | (cold start)     | flag set, refresh fails, none  | AwaitingUpload (cleared)     |
//! | AwaitingUpload   | begin_processing               | Processing                   |
//! | Processing       | complete(ok), refresh ok       | Ready                        |
//! | Processing       | complete(ok), refresh fails    | ConnectionError              |
//! | Processing       | complete(failed)               | AwaitingUpload               |
//! | ConnectionError  | retry ok                       | Ready                        |
//! | any              | reset                          | AwaitingUpload               |

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::aggregator::{Aggregator, RefreshStatus};
use crate::api::DashboardApi;
use crate::cache::{CacheStore, KeyValueStore};
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::RefreshError;
use crate::types::{DashboardSnapshot, Endpoint, PipelineState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    AwaitingUpload,
    Processing,
    Ready,
    ConnectionError,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::AwaitingUpload => "awaiting_upload",
            Phase::Processing => "processing",
            Phase::Ready => "ready",
            Phase::ConnectionError => "connection_error",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signal from the upload collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum ProcessingOutcome {
    Succeeded,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    /// Serve the cache when it is within the TTL.
    IfStale,
    /// Always go to the network.
    Force,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RefreshReport {
    CacheHit,
    Refreshed { status: RefreshStatus },
    /// A newer snapshot was committed while this cycle ran; its result was
    /// discarded.
    Superseded,
}

/// Point-in-time view of the controller for status displays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub phase: Phase,
    pub pipeline: PipelineState,
    /// Data shown is older than the last failed refresh attempt.
    pub stale: bool,
    pub degraded: Vec<Endpoint>,
    pub captured_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

struct ControllerState {
    phase: Phase,
    pipeline: PipelineState,
    snapshot: Option<Arc<DashboardSnapshot>>,
    stale: bool,
    last_error: Option<String>,
    /// Bumped by every reset; commits from an older epoch are dropped.
    generation: u64,
    epoch: CancellationToken,
}

impl ControllerState {
    fn fresh(generation: u64) -> Self {
        Self {
            phase: Phase::AwaitingUpload,
            pipeline: PipelineState::default(),
            snapshot: None,
            stale: false,
            last_error: None,
            generation,
            epoch: CancellationToken::new(),
        }
    }
}

struct Inner {
    config: SyncConfig,
    aggregator: Aggregator,
    cache: CacheStore,
    clock: Arc<dyn Clock>,
    state: Mutex<ControllerState>,
    refresh_attempts: AtomicUsize,
}

enum Commit {
    Committed,
    Superseded,
}

/// Cheap to clone; clones drive the same state.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

impl Controller {
    pub fn new(
        config: SyncConfig,
        api: Arc<dyn DashboardApi>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let aggregator = Aggregator::standard(api, clock.clone());
        Self::with_aggregator(config, aggregator, store, clock)
    }

    pub fn with_aggregator(
        config: SyncConfig,
        aggregator: Aggregator,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = CacheStore::new(store, clock.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                aggregator,
                cache,
                clock,
                state: Mutex::new(ControllerState::fresh(0)),
                refresh_attempts: AtomicUsize::new(0),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn api(&self) -> &Arc<dyn DashboardApi> {
        self.inner.aggregator.api()
    }

    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    /// Network refresh cycles started so far. Cache hits don't count.
    pub fn refresh_attempts(&self) -> usize {
        self.inner.refresh_attempts.load(Ordering::SeqCst)
    }

    /// The current snapshot. Only exposed once the pipeline is Ready.
    pub fn snapshot(&self) -> Option<Arc<DashboardSnapshot>> {
        let state = self.state();
        if state.phase == Phase::Ready && state.pipeline.etl_completed {
            state.snapshot.clone()
        } else {
            None
        }
    }

    pub fn status(&self) -> ControllerStatus {
        let state = self.state();
        ControllerStatus {
            phase: state.phase,
            pipeline: state.pipeline.clone(),
            stale: state.stale,
            degraded: state
                .snapshot
                .as_ref()
                .map(|s| s.degraded.clone())
                .unwrap_or_default(),
            captured_at: state.snapshot.as_ref().map(|s| s.captured_at),
            last_error: state.last_error.clone(),
        }
    }

    /// Rebuild in-memory state from the durable cache.
    pub async fn start(&self) -> Phase {
        let pipeline = self.inner.cache.load_pipeline_state();
        {
            let mut state = self.state();
            state.pipeline = pipeline.clone();
            if !pipeline.etl_completed {
                state.phase = Phase::AwaitingUpload;
                log::info!("cold start phase=awaiting_upload");
                return state.phase;
            }
            if let Some(snapshot) = self.inner.cache.get(self.inner.config.cache_ttl) {
                state.snapshot = Some(Arc::new(snapshot));
                state.phase = Phase::Ready;
                state.stale = false;
                log::info!("cold start phase=ready source=cache");
                return state.phase;
            }
        }

        match self.refresh_cycle(&CancellationToken::new()).await {
            Ok(_) => self.set_ready(),
            Err(e) if e.is_total_failure() => self.recover_cold_start(e),
            Err(e) => {
                log::warn!("cold start refresh aborted: {e}");
                self.phase()
            }
        }
    }

    fn recover_cold_start(&self, error: RefreshError) -> Phase {
        let mut state = self.state();
        state.last_error = Some(error.to_string());
        if let Some(stale) = self.inner.cache.peek() {
            log::warn!("cold start refresh failed, serving stale snapshot: {error}");
            state.snapshot = Some(Arc::new(stale));
            state.stale = true;
            state.phase = Phase::Ready;
        } else {
            log::warn!("cold start refresh failed with no cached data, clearing: {error}");
            if let Err(e) = self.inner.cache.clear() {
                log::warn!("failed to clear persisted state: {e}");
            }
            state.pipeline = PipelineState::default();
            state.snapshot = None;
            state.phase = Phase::AwaitingUpload;
        }
        state.phase
    }

    pub fn begin_processing(&self) -> Result<Phase, RefreshError> {
        let mut state = self.state();
        match state.phase {
            Phase::AwaitingUpload | Phase::Processing => {
                state.phase = Phase::Processing;
                state.last_error = None;
                log::info!("phase=processing");
                Ok(state.phase)
            }
            other => Err(invalid("begin processing", other)),
        }
    }

    /// Handle the upload collaborator's completion signal.
    pub async fn on_external_processing_complete(
        &self,
        outcome: ProcessingOutcome,
    ) -> Result<Phase, RefreshError> {
        let epoch = {
            let mut state = self.state();
            if !matches!(state.phase, Phase::AwaitingUpload | Phase::Processing) {
                return Err(invalid("complete processing", state.phase));
            }
            match outcome {
                ProcessingOutcome::Failed(reason) => {
                    log::warn!("processing failed: {reason}");
                    state.phase = Phase::AwaitingUpload;
                    state.last_error = Some(reason);
                    return Ok(state.phase);
                }
                ProcessingOutcome::Succeeded => {
                    let pipeline = PipelineState {
                        etl_completed: true,
                        last_updated: Some(self.inner.clock.now()),
                    };
                    self.inner.cache.save_pipeline_state(&pipeline)?;
                    state.pipeline = pipeline;
                    state.phase = Phase::Processing;
                    state.epoch.clone()
                }
            }
        };

        tokio::select! {
            biased;
            _ = epoch.cancelled() => return Err(RefreshError::Cancelled),
            _ = tokio::time::sleep(self.inner.config.settle_delay) => {}
        }

        match self.refresh_cycle(&CancellationToken::new()).await {
            Ok(_) => Ok(self.set_ready()),
            Err(e) if e.is_total_failure() => {
                let mut state = self.state();
                log::warn!("initial refresh after processing failed: {e}");
                state.phase = Phase::ConnectionError;
                state.last_error = Some(e.to_string());
                Ok(state.phase)
            }
            Err(e) => Err(e),
        }
    }

    /// Refresh while Ready. `IfStale` is a no-op when the persisted snapshot
    /// is within the TTL.
    pub async fn refresh(&self, mode: RefreshMode) -> Result<RefreshReport, RefreshError> {
        self.refresh_in(mode, &CancellationToken::new()).await
    }

    /// `refresh` bounded by an extra caller-owned token.
    pub async fn refresh_in(
        &self,
        mode: RefreshMode,
        scope: &CancellationToken,
    ) -> Result<RefreshReport, RefreshError> {
        {
            let mut state = self.state();
            if !state.pipeline.etl_completed {
                return Err(RefreshError::NotReady);
            }
            if state.phase != Phase::Ready {
                return Err(invalid("refresh", state.phase));
            }
            if mode == RefreshMode::IfStale && self.inner.cache.is_fresh(self.inner.config.cache_ttl) {
                if state.snapshot.is_none() {
                    state.snapshot = self.inner.cache.peek().map(Arc::new);
                }
                log::debug!("refresh skipped, cache fresh");
                return Ok(RefreshReport::CacheHit);
            }
        }

        match self.refresh_cycle(scope).await {
            Ok(report) => {
                self.state().stale = false;
                Ok(report)
            }
            Err(e) => {
                if e.is_total_failure() {
                    let mut state = self.state();
                    state.stale = state.snapshot.is_some();
                    state.last_error = Some(e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Re-attempt the initial refresh from `ConnectionError`.
    pub async fn retry(&self) -> Result<Phase, RefreshError> {
        let phase = self.phase();
        if phase != Phase::ConnectionError {
            return Err(invalid("retry", phase));
        }
        match self.refresh_cycle(&CancellationToken::new()).await {
            Ok(_) => Ok(self.set_ready()),
            Err(e) => {
                self.state().last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Discard everything: persisted keys, in-memory data and in-flight work.
    pub fn reset(&self) -> Result<(), RefreshError> {
        let mut state = self.state();
        state.epoch.cancel();
        let generation = state.generation + 1;
        *state = ControllerState::fresh(generation);
        self.inner.cache.clear()?;
        log::info!("reset phase=awaiting_upload generation={generation}");
        Ok(())
    }

    /// Token for one view's requests. Cancelled when the scope is dropped
    /// or the controller is reset.
    pub fn view_scope(&self) -> ViewScope {
        ViewScope {
            token: self.state().epoch.child_token(),
        }
    }

    /// Start the recurring background refresh. Stops when the handle drops.
    pub fn spawn_auto_refresh(&self) -> AutoRefreshHandle {
        let controller = self.clone();
        let stop = CancellationToken::new();
        let scope = stop.clone();
        let period = self.inner.config.refresh_period;
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = scope.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if controller.phase() != Phase::Ready {
                    continue;
                }
                match controller.refresh_in(RefreshMode::IfStale, &scope).await {
                    Ok(report) => log::debug!("auto refresh {report:?}"),
                    Err(RefreshError::Cancelled) => {}
                    Err(e) => log::warn!("auto refresh failed: {e}"),
                }
            }
            log::debug!("auto refresh stopped");
        });
        AutoRefreshHandle {
            stop,
            task: Some(task),
        }
    }

    fn set_ready(&self) -> Phase {
        let mut state = self.state();
        state.phase = Phase::Ready;
        state.stale = false;
        state.last_error = None;
        log::info!("phase=ready");
        state.phase
    }

    /// One network cycle under the current epoch, committed if still current.
    async fn refresh_cycle(&self, scope: &CancellationToken) -> Result<RefreshReport, RefreshError> {
        let (epoch, generation) = {
            let state = self.state();
            (state.epoch.clone(), state.generation)
        };
        self.inner.refresh_attempts.fetch_add(1, Ordering::SeqCst);

        let outcome = tokio::select! {
            biased;
            _ = scope.cancelled() => return Err(RefreshError::Cancelled),
            result = self.inner.aggregator.refresh(&epoch) => result?,
        };

        let status = outcome.status.clone();
        match self.commit(outcome.snapshot, generation) {
            Commit::Committed => Ok(RefreshReport::Refreshed { status }),
            Commit::Superseded => Ok(RefreshReport::Superseded),
        }
    }

    /// Last-writer-wins by `captured_at`; a reset in between voids the commit.
    fn commit(&self, snapshot: DashboardSnapshot, generation: u64) -> Commit {
        let mut state = self.state();
        if state.generation != generation {
            log::debug!("dropping refresh result from generation={generation}");
            return Commit::Superseded;
        }
        if let Some(current) = &state.snapshot {
            if current.captured_at > snapshot.captured_at {
                log::debug!(
                    "dropping older snapshot captured_at={} current={}",
                    snapshot.captured_at,
                    current.captured_at
                );
                return Commit::Superseded;
            }
        }
        if let Err(e) = self.inner.cache.put(&snapshot) {
            log::warn!("failed to persist snapshot: {e}");
        }
        state.pipeline.last_updated = Some(snapshot.captured_at);
        if let Err(e) = self.inner.cache.save_pipeline_state(&state.pipeline) {
            log::warn!("failed to persist pipeline state: {e}");
        }
        state.snapshot = Some(Arc::new(snapshot));
        state.last_error = None;
        Commit::Committed
    }
}

fn invalid(action: &str, phase: Phase) -> RefreshError {
    RefreshError::InvalidTransition {
        action: action.to_string(),
        phase: phase.to_string(),
    }
}

/// Cancellation scope owned by one view.
pub struct ViewScope {
    token: CancellationToken,
}

impl ViewScope {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for ViewScope {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Keeps the background refresh task alive.
pub struct AutoRefreshHandle {
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl AutoRefreshHandle {
    /// Stop the task and wait for it to finish.
    pub async fn shutdown(mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("auto refresh task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for AutoRefreshHandle {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
