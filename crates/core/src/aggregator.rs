//! Round orchestration.
//!
//! The aggregator owns the source set, fires one round per interval, fans the
//! fetches out concurrently, closes the round at its deadline and publishes
//! the combined result.
//!
//! # Round lifecycle
//!
//! ```text
//! Idle ──start──▶ Polling ──▶ Aggregating ──▶ Published ──tick──▶ Polling …
//!   ▲                                                              │
//!   └──────────────────────────── stop ────────────────────────────┘
//! ```
//!
//! Source-set swaps requested while a round is in flight are staged and
//! applied when the round ends. Every round is tagged with the epoch it
//! started in; `stop()` bumps the epoch under the commit lock, so a round
//! that was mid-flight at stop never reaches the node status tracker.

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::{Mutex, RwLock};
use pulse_chain::{
    ChainClient, ChainConfig, Clock, FetchError, PulseData, PulseFetcher, ReadingGuard, SourceId,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::aggregation::{AggregateValue, AggregationAlgorithm, Outlier};
use crate::config::{validate, validate_sources, AggregatorSettings, ConfigSource};
use crate::error::{AggregationError, AggregatorError, ConfigError, QuorumStage, RoundError};
use crate::events::{AggregatedPulseData, AggregatorState, RoundEvent, RoundFailure, SourceReading};
use crate::status::{FailureReason, NodeStatusTracker, QuantumNodeStatus};

/// Multi-source pulse aggregator.
pub struct OracleAggregator {
    inner: Arc<Inner>,
}

struct Inner {
    settings: AggregatorSettings,
    algorithm: AggregationAlgorithm,
    fetcher: PulseFetcher,
    clock: Arc<dyn Clock>,
    sources: Mutex<SourceSet>,
    tracker: NodeStatusTracker,
    latest: RwLock<Option<Arc<AggregatedPulseData>>>,
    events: broadcast::Sender<RoundEvent>,
    state: watch::Sender<AggregatorState>,
    /// Bumped by stop(); rounds from an older epoch are discarded
    epoch: AtomicU64,
    /// Mirrors `epoch` so rounds in flight wake up on stop
    cancel: watch::Sender<u64>,
    /// Number of the last committed round
    rounds: AtomicU64,
    /// Held while a round's outcome is applied
    commit: Mutex<()>,
    /// Serializes scheduled and on-demand rounds
    round_lock: tokio::sync::Mutex<()>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

struct SourceSet {
    active: Arc<Vec<ChainConfig>>,
    pending: Option<Vec<ChainConfig>>,
    round_active: bool,
}

/// Outcome of the aggregation step, before commit.
enum Evaluation {
    Combined(AggregateValue),
    Lost {
        error: RoundError,
        outliers: Vec<Outlier>,
    },
}

impl Evaluation {
    fn outliers(&self) -> &[Outlier] {
        match self {
            Self::Combined(value) => &value.outliers,
            Self::Lost { outliers, .. } => outliers,
        }
    }
}

/// Marks a round as in flight; releases staged source sets on drop,
/// including when the round future is aborted.
struct ActiveRound<'a> {
    inner: &'a Inner,
}

impl Drop for ActiveRound<'_> {
    fn drop(&mut self) {
        self.inner.end_round();
    }
}

impl std::fmt::Debug for OracleAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleAggregator")
            .field("profile", &self.inner.settings.profile)
            .field("sources", &self.inner.sources.lock().active.len())
            .field("state", &*self.inner.state.borrow())
            .field("rounds", &self.inner.rounds.load(Ordering::Relaxed))
            .finish()
    }
}

impl OracleAggregator {
    /// Create an aggregator. Nothing runs until [`start`](Self::start) or
    /// [`poll_round`](Self::poll_round).
    pub fn new(
        settings: AggregatorSettings,
        sources: Vec<ChainConfig>,
        client: Arc<dyn ChainClient>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        validate(&settings, &sources)?;

        let mut guard = ReadingGuard::new(settings.staleness_bound());
        if let Some(max) = settings.max_value {
            guard = guard.with_max_value(max);
        }

        let fetcher = PulseFetcher::new(client, Arc::clone(&clock), guard);
        let tracker = NodeStatusTracker::new(&sources, settings.health_thresholds());
        let algorithm = AggregationAlgorithm::new(settings.outlier_tolerance, settings.quorum);
        let (events, _) = broadcast::channel(settings.event_capacity);
        let (state, _) = watch::channel(AggregatorState::Idle);
        let (cancel, _) = watch::channel(0);

        info!(
            profile = %settings.profile,
            sources = sources.len(),
            enabled = sources.iter().filter(|s| s.enabled).count(),
            quorum = settings.quorum,
            "Aggregator created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                settings,
                algorithm,
                fetcher,
                clock,
                sources: Mutex::new(SourceSet {
                    active: Arc::new(sources),
                    pending: None,
                    round_active: false,
                }),
                tracker,
                latest: RwLock::new(None),
                events,
                state,
                epoch: AtomicU64::new(0),
                cancel,
                rounds: AtomicU64::new(0),
                commit: Mutex::new(()),
                round_lock: tokio::sync::Mutex::new(()),
                scheduler: Mutex::new(None),
            }),
        })
    }

    /// Arm the scheduler. The first round fires immediately.
    pub fn start(&self) -> Result<(), AggregatorError> {
        let mut scheduler = self.inner.scheduler.lock();
        if scheduler.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(AggregatorError::AlreadyRunning);
        }

        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        *scheduler = Some(tokio::spawn(inner.schedule(epoch)));

        info!(
            interval_ms = self.inner.settings.interval_ms,
            deadline_ms = self.inner.settings.deadline_ms,
            "Aggregator started"
        );
        Ok(())
    }

    /// Stop scheduling and cancel the round in flight, if any.
    pub fn stop(&self) {
        {
            let _commit = self.inner.commit.lock();
            let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            self.inner.cancel.send_replace(epoch);
            self.inner.state.send_replace(AggregatorState::Idle);
        }

        if let Some(handle) = self.inner.scheduler.lock().take() {
            handle.abort();
            info!("Aggregator stopped");
        }
    }

    /// Whether the scheduler is armed.
    pub fn is_running(&self) -> bool {
        self.inner
            .scheduler
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Run one round now and return its outcome.
    pub async fn poll_round(&self) -> Result<Arc<AggregatedPulseData>, AggregatorError> {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        self.inner.run_round(epoch).await
    }

    /// Replace the source set. Applied immediately when no round is in
    /// flight, otherwise when the current round ends.
    pub fn reconfigure(&self, sources: Vec<ChainConfig>) -> Result<(), ConfigError> {
        if let Err(e) = validate_sources(&self.inner.settings, &sources) {
            warn!(error = %e, "Rejected source set");
            return Err(e);
        }

        let mut set = self.inner.sources.lock();
        if set.round_active {
            info!(sources = sources.len(), "Round in flight, staging source set");
            set.pending = Some(sources);
        } else {
            self.inner.apply_sources(&mut set, sources);
        }

        Ok(())
    }

    /// Load a source set from `source` and reconfigure with it.
    pub async fn reload(&self, source: &dyn ConfigSource) -> Result<(), AggregatorError> {
        let sources = source.load().await.map_err(|e| {
            warn!(error = %e, "Failed to load source set");
            e
        })?;
        self.reconfigure(sources)?;
        Ok(())
    }

    /// Most recent successful round.
    pub fn latest(&self) -> Option<Arc<AggregatedPulseData>> {
        self.inner.latest.read().clone()
    }

    /// Health of every configured source.
    pub fn status(&self) -> BTreeMap<SourceId, QuantumNodeStatus> {
        self.inner.tracker.snapshot()
    }

    /// Receive every round outcome from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RoundEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> AggregatorState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<AggregatorState> {
        self.inner.state.subscribe()
    }

    /// Active source set.
    pub fn sources(&self) -> Vec<ChainConfig> {
        self.inner.sources.lock().active.as_ref().clone()
    }

    pub fn settings(&self) -> &AggregatorSettings {
        &self.inner.settings
    }

    /// Run the liveness probe against every enabled source.
    pub async fn probe_sources(&self) -> BTreeMap<SourceId, Result<u64, FetchError>> {
        let sources = Arc::clone(&self.inner.sources.lock().active);
        let fetcher = &self.inner.fetcher;

        let probes = sources.iter().filter(|s| s.enabled).map(|source| async move {
            let result = fetcher.probe(source, source.timeout()).await;
            if let Err(e) = &result {
                warn!(source = %source.id, error = %e, "Probe failed");
            }
            (source.id.clone(), result)
        });

        join_all(probes).await.into_iter().collect()
    }
}

impl Drop for OracleAggregator {
    fn drop(&mut self) {
        if let Some(handle) = self.inner.scheduler.lock().take() {
            handle.abort();
        }
    }
}

impl Inner {
    async fn schedule(self: Arc<Self>, epoch: u64) {
        let mut ticker = tokio::time::interval(self.settings.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match self.run_round(epoch).await {
                Ok(_) | Err(AggregatorError::RoundFailed(_)) => {}
                Err(AggregatorError::Cancelled) => break,
                Err(e) => warn!(error = %e, "Round error"),
            }
        }

        debug!(epoch = epoch, "Scheduler exited");
    }

    #[instrument(skip(self))]
    async fn run_round(&self, epoch: u64) -> Result<Arc<AggregatedPulseData>, AggregatorError> {
        let _serial = self.round_lock.lock().await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return Err(AggregatorError::Cancelled);
        }

        let sources = self.begin_round();
        let _active = ActiveRound { inner: self };

        if !self.transition(epoch, AggregatorState::Polling) {
            return Err(AggregatorError::Cancelled);
        }

        // Rounds are serialized, so the number is only taken by commit
        let round = self.rounds.load(Ordering::SeqCst) + 1;
        let timestamp_ms = self.clock.now_ms();
        let (readings, failures) = self.collect(epoch, round, &sources).await?;

        if !self.transition(epoch, AggregatorState::Aggregating) {
            return Err(AggregatorError::Cancelled);
        }
        let weights: BTreeMap<SourceId, f64> = sources
            .iter()
            .filter(|s| s.enabled)
            .map(|s| (s.id.clone(), s.weight))
            .collect();
        let evaluation = self.evaluate(&readings, &weights);

        self.commit(epoch, round, timestamp_ms, readings, failures, evaluation)
    }

    /// Fetch from every enabled source until all settle or the round deadline
    /// passes. A stop in the meantime drops the fetches still in flight.
    async fn collect(
        &self,
        epoch: u64,
        round: u64,
        sources: &[ChainConfig],
    ) -> Result<(Vec<PulseData>, BTreeMap<SourceId, FetchError>), AggregatorError> {
        let round_deadline = Instant::now() + self.settings.deadline();
        let enabled: Vec<&ChainConfig> = sources.iter().filter(|s| s.enabled).collect();

        let call_deadline = |config: &ChainConfig| {
            config
                .timeout()
                .min(round_deadline.saturating_duration_since(Instant::now()))
        };

        let mut pending: FuturesUnordered<_> = enabled
            .iter()
            .map(|&config| {
                let deadline = call_deadline(config);
                async move { (config, self.fetcher.fetch(config, deadline).await) }
            })
            .collect();

        debug!(round = round, sources = enabled.len(), "Polling sources");

        let mut readings = Vec::with_capacity(enabled.len());
        let mut failures = BTreeMap::new();
        let mut settled: HashSet<&str> = HashSet::with_capacity(enabled.len());

        let expiry = tokio::time::sleep_until(round_deadline);
        let stopped = self.stopped(epoch);
        tokio::pin!(expiry, stopped);

        loop {
            tokio::select! {
                next = pending.next() => match next {
                    Some((config, result)) => {
                        settled.insert(config.id.as_str());
                        match result {
                            Ok(pulse) => readings.push(pulse),
                            Err(e) => {
                                debug!(
                                    round = round,
                                    source = %config.id,
                                    kind = e.label(),
                                    error = %e,
                                    "Fetch failed"
                                );
                                failures.insert(config.id.clone(), e);
                            }
                        }
                    }
                    None => break,
                },
                _ = &mut expiry => break,
                _ = &mut stopped => {
                    debug!(round = round, "Round cancelled by stop");
                    return Err(AggregatorError::Cancelled);
                }
            }
        }

        // Late responses are discarded with their futures
        drop(pending);

        for config in &enabled {
            if !settled.contains(config.id.as_str()) {
                let after = config.timeout().min(self.settings.deadline());
                debug!(round = round, source = %config.id, "Straggler timed out");
                failures.insert(config.id.clone(), FetchError::Timeout { after });
            }
        }

        readings.sort_by_key(|r| enabled.iter().position(|c| c.id == r.source));
        Ok((readings, failures))
    }

    /// Resolves once `epoch` has been ended by stop().
    fn stopped(&self, epoch: u64) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut cancel = self.cancel.subscribe();
        async move {
            while *cancel.borrow_and_update() == epoch {
                if cancel.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }
    }

    fn evaluate(&self, readings: &[PulseData], weights: &BTreeMap<SourceId, f64>) -> Evaluation {
        let quorum = self.algorithm.quorum();
        let fetch_lost = |available: usize| Evaluation::Lost {
            error: RoundError::QuorumLost {
                stage: QuorumStage::Fetch,
                required: quorum,
                available,
            },
            outliers: Vec::new(),
        };

        if readings.len() < quorum {
            return fetch_lost(readings.len());
        }

        match self.algorithm.combine(readings, weights) {
            Ok(value) => Evaluation::Combined(value),
            Err(AggregationError::NoReadings) => fetch_lost(0),
            Err(AggregationError::QuorumLost {
                required,
                survivors,
                outliers,
            }) => Evaluation::Lost {
                error: RoundError::QuorumLost {
                    stage: QuorumStage::OutlierRejection,
                    required,
                    available: survivors,
                },
                outliers,
            },
        }
    }

    /// Apply a round's outcome. Runs without suspension points under the
    /// commit lock.
    fn commit(
        &self,
        epoch: u64,
        round: u64,
        timestamp_ms: u64,
        readings: Vec<PulseData>,
        failures: BTreeMap<SourceId, FetchError>,
        evaluation: Evaluation,
    ) -> Result<Arc<AggregatedPulseData>, AggregatorError> {
        let _commit = self.commit.lock();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!(round = round, "Discarding round cancelled by stop");
            return Err(AggregatorError::Cancelled);
        }
        self.rounds.store(round, Ordering::SeqCst);

        let now_ms = self.clock.now_ms();
        let outliers = evaluation.outliers();
        for reading in &readings {
            match outliers.iter().find(|o| o.source == reading.source) {
                Some(outlier) => self.tracker.record_failure(
                    &reading.source,
                    FailureReason::Outlier {
                        value: outlier.value,
                        median: outlier.median,
                    },
                ),
                None => self.tracker.record_reading(reading, now_ms),
            }
        }
        for (source, error) in &failures {
            self.tracker
                .record_failure(source, FailureReason::Fetch(error.clone()));
        }

        let outlier_ids: Vec<SourceId> = outliers.iter().map(|o| o.source.clone()).collect();

        let outcome = match evaluation {
            Evaluation::Combined(aggregate) => {
                let contributing: HashSet<&str> =
                    aggregate.contributors.iter().map(String::as_str).collect();
                let readings_by_source = readings
                    .iter()
                    .filter(|r| contributing.contains(r.source.as_str()))
                    .map(|r| (r.source.clone(), SourceReading::from(r)))
                    .collect();
                let consensus_reached = self
                    .settings
                    .consensus_threshold
                    .map_or(true, |threshold| aggregate.value >= threshold);

                let data = Arc::new(AggregatedPulseData {
                    round,
                    value: aggregate.value,
                    contributors: aggregate.contributors,
                    readings: readings_by_source,
                    failures,
                    outliers: outlier_ids,
                    timestamp_ms,
                    quorum: self.settings.quorum,
                    confidence: aggregate.confidence,
                    consensus_reached,
                });

                info!(
                    round = round,
                    value = data.value,
                    contributors = data.contributors.len(),
                    failed = data.failures.len(),
                    outliers = data.outliers.len(),
                    confidence = data.confidence,
                    consensus = data.consensus_reached,
                    "Round published"
                );

                *self.latest.write() = Some(Arc::clone(&data));
                let _ = self.events.send(RoundEvent::Published(Arc::clone(&data)));
                Ok(data)
            }
            Evaluation::Lost { error, .. } => {
                let failure = Arc::new(RoundFailure {
                    round,
                    error,
                    readings,
                    failures,
                    outliers: outlier_ids,
                    timestamp_ms,
                });

                warn!(
                    round = round,
                    error = %failure.error,
                    readings = failure.readings.len(),
                    failed = failure.failures.len(),
                    outliers = failure.outliers.len(),
                    "Round lost quorum"
                );

                let _ = self.events.send(RoundEvent::Failed(Arc::clone(&failure)));
                Err(AggregatorError::RoundFailed(failure))
            }
        };

        self.state.send_replace(AggregatorState::Published);
        outcome
    }

    /// Change state unless the round's epoch has ended.
    fn transition(&self, epoch: u64, state: AggregatorState) -> bool {
        let _commit = self.commit.lock();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return false;
        }
        self.state.send_replace(state);
        true
    }

    fn begin_round(&self) -> Arc<Vec<ChainConfig>> {
        let mut set = self.sources.lock();
        if let Some(next) = set.pending.take() {
            self.apply_sources(&mut set, next);
        }
        set.round_active = true;
        Arc::clone(&set.active)
    }

    fn end_round(&self) {
        let mut set = self.sources.lock();
        set.round_active = false;
        if let Some(next) = set.pending.take() {
            self.apply_sources(&mut set, next);
        }
    }

    fn apply_sources(&self, set: &mut SourceSet, sources: Vec<ChainConfig>) {
        self.tracker.resync(&sources);
        info!(
            sources = sources.len(),
            enabled = sources.iter().filter(|s| s.enabled).count(),
            "Source set applied"
        );
        set.active = Arc::new(sources);
    }
}
