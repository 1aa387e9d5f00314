//! Background data collector.
//!
//! One tick loop drives every network and storage call. Each tick starts a
//! cycle unless one is still in flight, in which case the tick is dropped and
//! counted. A cycle asks the [`FallbackAggregator`] for a reading, retrying
//! retryable failures with [`BackoffPolicy`], and upserts the result.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use time::{Date, OffsetDateTime};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use stationlog_core::FallbackAggregator;
use stationlog_types::{CollectionCycleResult, ErrorKind};

use crate::backoff::BackoffPolicy;
use crate::state::AppState;

/// Failures logged at `warn` before switching to a single `error`.
const LOUD_FAILURES: u32 = 3;

/// Scheduled collector.
pub struct Collector {
    state: Arc<AppState>,
    aggregator: Arc<FallbackAggregator>,
    policy: BackoffPolicy,
    interval: Duration,
    jitter: Duration,
    shutdown_grace: Duration,
    retention: Option<time::Duration>,
}

impl Collector {
    /// Create a collector with the schedule and policy from the state's
    /// configuration.
    pub fn new(state: Arc<AppState>, aggregator: Arc<FallbackAggregator>) -> Self {
        let config = &state.config;
        let policy = BackoffPolicy::from_config(&config.collector);
        let interval = config.collector.interval();
        let jitter = config.collector.jitter();
        let shutdown_grace = config.collector.shutdown_grace();
        let retention = config.storage.retention();
        Self {
            state,
            aggregator,
            policy,
            interval,
            jitter,
            shutdown_grace,
            retention,
        }
    }

    /// Override the retry policy.
    #[must_use]
    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Override the tick interval and jitter bound.
    #[must_use]
    pub fn with_schedule(mut self, interval: Duration, jitter: Duration) -> Self {
        self.interval = interval;
        self.jitter = jitter;
        self
    }

    /// Override the shutdown grace period.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Spawn the tick loop. It stops when the state's shutdown token is
    /// cancelled.
    pub fn start(self) -> JoinHandle<()> {
        let cancel = self.state.collector.shutdown_token();
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Run the tick loop until `cancel` fires.
    ///
    /// The first tick fires immediately. On cancellation an in-flight cycle
    /// gets the shutdown grace period to finish before it is aborted.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "Starting collector (interval: {}s, jitter: up to {}s, sources: {:?})",
            self.interval.as_secs(),
            self.jitter.as_secs(),
            self.aggregator.sources()
        );
        self.state.collector.set_running(true);

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<(OffsetDateTime, JoinHandle<CollectionCycleResult>)> = None;
        let mut last_prune: Option<Date> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let delay = self.tick_jitter();
            if !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(delay) => {}
                }
            }

            if in_flight.as_ref().is_some_and(|(_, h)| h.is_finished()) {
                in_flight = None;
            }

            self.maybe_prune(&mut last_prune).await;

            if in_flight.is_some() {
                let dropped = self.state.collector.record_dropped_tick();
                warn!(
                    "Previous cycle still in flight, dropping tick ({} dropped so far)",
                    dropped
                );
                continue;
            }

            let state = Arc::clone(&self.state);
            let aggregator = Arc::clone(&self.aggregator);
            let policy = self.policy.clone();
            let cycle_cancel = cancel.clone();
            let started = OffsetDateTime::now_utc();
            let handle = tokio::spawn(async move {
                match execute_cycle(&state, &aggregator, &policy, &cycle_cancel).await {
                    Some(result) => result,
                    None => {
                        // Lost the phase race to a manual collection.
                        let dropped = state.collector.record_dropped_tick();
                        debug!("Cycle already in flight, tick dropped ({})", dropped);
                        CollectionCycleResult::failure(
                            started,
                            ErrorKind::Cancelled,
                            "tick dropped",
                            0,
                        )
                    }
                }
            });
            in_flight = Some((started, handle));
        }

        info!("Collector stopping");
        if let Some((started, mut handle)) = in_flight
            && !handle.is_finished()
        {
            info!(
                "Waiting up to {}s for the in-flight cycle",
                self.shutdown_grace.as_secs()
            );
            match timeout(self.shutdown_grace, &mut handle).await {
                Ok(_) => debug!("In-flight cycle finished during shutdown"),
                Err(_) => {
                    handle.abort();
                    let _ = handle.await;
                    warn!("In-flight cycle aborted after the shutdown grace period");
                    let result = CollectionCycleResult::failure(
                        started,
                        ErrorKind::Cancelled,
                        "cycle aborted at shutdown",
                        0,
                    );
                    record(&self.state, &result).await;
                }
            }
        }

        self.state.collector.set_running(false);
        info!("Collector stopped");
    }

    /// Run one cycle now, outside the schedule.
    ///
    /// Returns `None` when a cycle is already in flight.
    pub async fn collect_now(&self) -> Option<CollectionCycleResult> {
        let cancel = self.state.collector.shutdown_token();
        execute_cycle(&self.state, &self.aggregator, &self.policy, &cancel).await
    }

    fn tick_jitter(&self) -> Duration {
        let max_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }

    /// Delete expired readings, at most once per UTC day.
    async fn maybe_prune(&self, last_prune: &mut Option<Date>) {
        let Some(retention) = self.retention else {
            return;
        };
        let now = OffsetDateTime::now_utc();
        if *last_prune == Some(now.date()) {
            return;
        }
        *last_prune = Some(now.date());

        let store = self.state.store.lock().await;
        match store.prune_before(now - retention) {
            Ok(removed) => debug!("Retention pass removed {} readings", removed),
            Err(e) => warn!("Retention pass failed: {}", e),
        }
    }
}

/// Claim the phase, run one cycle and record its outcome.
async fn execute_cycle(
    state: &AppState,
    aggregator: &FallbackAggregator,
    policy: &BackoffPolicy,
    cancel: &CancellationToken,
) -> Option<CollectionCycleResult> {
    let guard = state.collector.try_begin_cycle()?;
    let result = run_cycle(state, aggregator, policy, cancel).await;
    guard.finish(result.succeeded);
    record(state, &result).await;
    Some(result)
}

/// Sub-attempts with backoff until a reading is stored or the budget is
/// spent.
async fn run_cycle(
    state: &AppState,
    aggregator: &FallbackAggregator,
    policy: &BackoffPolicy,
    cancel: &CancellationToken,
) -> CollectionCycleResult {
    let attempted_at = OffsetDateTime::now_utc();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let err = match aggregator.collect_once().await {
            Ok(reading) => {
                let outcome = {
                    let store = state.store.lock().await;
                    store.upsert(&reading)
                };
                return match outcome {
                    Ok(outcome) => CollectionCycleResult::success(
                        attempted_at,
                        reading.source,
                        attempts,
                        !outcome.is_inserted(),
                    ),
                    Err(e) => CollectionCycleResult::failure(
                        attempted_at,
                        ErrorKind::Store,
                        e.to_string(),
                        attempts,
                    ),
                };
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            debug!("Not retrying: {}", err);
            return CollectionCycleResult::failure(
                attempted_at,
                err.cycle_kind(),
                err.to_string(),
                attempts,
            );
        }
        if !policy.has_attempts_left(attempts) {
            return CollectionCycleResult::failure(
                attempted_at,
                err.cycle_kind(),
                err.to_string(),
                attempts,
            );
        }

        let delay = policy.next_delay(attempts - 1, err.retry_after());
        warn!(
            "Collection attempt {}/{} failed, retrying in {:?}: {}",
            attempts, policy.max_attempts, delay, err
        );
        tokio::select! {
            _ = cancel.cancelled() => {
                return CollectionCycleResult::failure(
                    attempted_at,
                    ErrorKind::Cancelled,
                    format!("shutdown during backoff: {err}"),
                    attempts,
                );
            }
            _ = sleep(delay) => {}
        }
    }
}

/// Log a result and fold it into the in-memory and persisted counters.
async fn record(state: &AppState, result: &CollectionCycleResult) {
    let consecutive = state.collector.record_result(result).await;

    if result.succeeded {
        info!(
            "Cycle succeeded from {} after {} attempt(s){}",
            result
                .source_used
                .map(|s| s.as_str())
                .unwrap_or("unknown"),
            result.attempts,
            if result.duplicate {
                " (already stored)"
            } else {
                ""
            }
        );
    } else {
        let kind = result.error_kind.map(|k| k.as_str()).unwrap_or("unknown");
        let message = result.error_message.as_deref().unwrap_or("");
        if consecutive <= LOUD_FAILURES {
            warn!(
                "Cycle failed ({}) after {} attempt(s): {} (failure {})",
                kind, result.attempts, message, consecutive
            );
        } else if consecutive == LOUD_FAILURES + 1 {
            error!(
                "Cycle failed {} times in a row, will keep trying quietly: {}",
                consecutive, message
            );
        } else {
            debug!("Cycle failed ({}): {}", kind, message);
        }
    }

    let store = state.store.lock().await;
    if let Err(e) = store.record_cycle(result) {
        warn!("Failed to record cycle counters: {}", e);
    }
}
