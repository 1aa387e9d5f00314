//! Application state shared by the collector and the HTTP handlers.
//!
//! # Collector phase
//!
//! The collector moves through `Idle → Collecting → (Succeeded | Failed) → Idle`.
//! The phase lives in an atomic; a cycle may only start through a
//! compare-and-set from `Idle` to `Collecting`, so two cycles can never
//! overlap and a tick that finds a cycle in flight is dropped.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use stationlog_core::ClientMetrics;
use stationlog_store::{SourceCount, Store};
use stationlog_types::{CollectionCycleResult, Source};

use crate::config::Config;

/// Cycle results kept in memory.
pub const HISTORY_CAPACITY: usize = 100;

/// Shared application state.
pub struct AppState {
    /// The data store (one writer at a time).
    pub store: Mutex<Store>,
    /// Effective configuration.
    pub config: Config,
    /// Collector phase, counters and history.
    pub collector: CollectorState,
    /// Request metrics shared by every source.
    pub client_metrics: Arc<ClientMetrics>,
}

impl AppState {
    /// Create new application state.
    pub fn new(store: Store, config: Config) -> Arc<Self> {
        Self::with_metrics(store, config, Arc::new(ClientMetrics::new()))
    }

    /// Create state around an existing metrics sink.
    pub fn with_metrics(
        store: Store,
        config: Config,
        client_metrics: Arc<ClientMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store: Mutex::new(store),
            config,
            collector: CollectorState::new(),
            client_metrics,
        })
    }
}

/// Collector phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CollectorPhase {
    /// Waiting for the next tick.
    Idle = 0,
    /// A cycle is in flight.
    Collecting = 1,
    /// The last cycle stored a reading; about to return to idle.
    Succeeded = 2,
    /// The last cycle failed; about to return to idle.
    Failed = 3,
}

impl CollectorPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CollectorPhase::Collecting,
            2 => CollectorPhase::Succeeded,
            3 => CollectorPhase::Failed,
            _ => CollectorPhase::Idle,
        }
    }

    /// Stable string tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectorPhase::Idle => "idle",
            CollectorPhase::Collecting => "collecting",
            CollectorPhase::Succeeded => "succeeded",
            CollectorPhase::Failed => "failed",
        }
    }
}

/// State for tracking the collector.
pub struct CollectorState {
    phase: AtomicU8,
    /// Whether the tick loop is running.
    running: AtomicBool,
    /// When the tick loop was started (Unix timestamp).
    started_at: AtomicU64,
    cycles: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    dropped_ticks: AtomicU64,
    duplicates: AtomicU64,
    per_source: [AtomicU64; Source::ALL.len()],
    consecutive_failures: AtomicU32,
    /// Stops the tick loop and interrupts backoff waits.
    shutdown: CancellationToken,
    history: RwLock<VecDeque<CollectionCycleResult>>,
}

impl CollectorState {
    /// Create a new collector state.
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(CollectorPhase::Idle as u8),
            running: AtomicBool::new(false),
            started_at: AtomicU64::new(0),
            cycles: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dropped_ticks: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            per_source: std::array::from_fn(|_| AtomicU64::new(0)),
            consecutive_failures: AtomicU32::new(0),
            shutdown: CancellationToken::new(),
            history: RwLock::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> CollectorPhase {
        CollectorPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Claim the right to run a cycle. Returns `None` when one is in flight.
    ///
    /// The returned guard puts the phase back to `Idle` when dropped, also
    /// when the cycle task is aborted.
    pub fn try_begin_cycle(&self) -> Option<CycleGuard<'_>> {
        self.phase
            .compare_exchange(
                CollectorPhase::Idle as u8,
                CollectorPhase::Collecting as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .ok()
            .map(|_| CycleGuard { state: self })
    }

    /// Count a tick that found a cycle in flight.
    pub fn record_dropped_tick(&self) -> u64 {
        self.dropped_ticks.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Fold a finished cycle into the counters and history.
    ///
    /// Returns the number of consecutive failures including this one.
    pub async fn record_result(&self, result: &CollectionCycleResult) -> u32 {
        self.cycles.fetch_add(1, Ordering::SeqCst);
        let consecutive = if result.succeeded {
            self.succeeded.fetch_add(1, Ordering::SeqCst);
            if result.duplicate {
                self.duplicates.fetch_add(1, Ordering::SeqCst);
            }
            if let Some(source) = result.source_used
                && let Some(i) = Source::ALL.iter().position(|s| *s == source)
            {
                self.per_source[i].fetch_add(1, Ordering::SeqCst);
            }
            self.consecutive_failures.store(0, Ordering::SeqCst);
            0
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
            self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1
        };

        let mut history = self.history.write().await;
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(result.clone());

        consecutive
    }

    /// Most recent results, newest first.
    pub async fn recent_results(&self, limit: usize) -> Vec<CollectionCycleResult> {
        self.history
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// The last finished cycle.
    pub async fn last_result(&self) -> Option<CollectionCycleResult> {
        self.history.read().await.back().cloned()
    }

    /// Check if the tick loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Mark the tick loop as started or stopped.
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
        if running {
            let now = OffsetDateTime::now_utc().unix_timestamp() as u64;
            self.started_at.store(now, Ordering::SeqCst);
        }
    }

    /// Get the tick loop start time.
    pub fn started_at(&self) -> Option<OffsetDateTime> {
        let ts = self.started_at.load(Ordering::SeqCst);
        if ts == 0 {
            None
        } else {
            OffsetDateTime::from_unix_timestamp(ts as i64).ok()
        }
    }

    /// Token cancelled on shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Ask the collector to stop.
    pub fn signal_stop(&self) {
        self.shutdown.cancel();
    }

    /// Point-in-time copy of the counters.
    pub async fn stats(&self) -> CollectorStats {
        CollectorStats {
            phase: self.phase(),
            running: self.is_running(),
            started_at: self.started_at(),
            cycles: self.cycles.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            dropped_ticks: self.dropped_ticks.load(Ordering::SeqCst),
            duplicates: self.duplicates.load(Ordering::SeqCst),
            consecutive_failures: self.consecutive_failures.load(Ordering::SeqCst),
            per_source: Source::ALL
                .iter()
                .zip(self.per_source.iter())
                .map(|(source, count)| SourceCount {
                    source: *source,
                    count: count.load(Ordering::SeqCst),
                })
                .collect(),
            last_result: self.last_result().await,
        }
    }

    fn finish(&self, succeeded: bool) {
        let phase = if succeeded {
            CollectorPhase::Succeeded
        } else {
            CollectorPhase::Failed
        };
        self.phase.store(phase as u8, Ordering::SeqCst);
    }
}

impl Default for CollectorState {
    fn default() -> Self {
        Self::new()
    }
}

/// Ownership of the `Collecting` phase for one cycle.
pub struct CycleGuard<'a> {
    state: &'a CollectorState,
}

impl CycleGuard<'_> {
    /// Record the cycle outcome phase. The phase returns to `Idle` when the
    /// guard is dropped.
    pub fn finish(&self, succeeded: bool) {
        self.state.finish(succeeded);
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.state
            .phase
            .store(CollectorPhase::Idle as u8, Ordering::SeqCst);
    }
}

/// Collector counters as served by the status API.
#[derive(Debug, Clone, Serialize)]
pub struct CollectorStats {
    /// Current phase.
    pub phase: CollectorPhase,
    /// Whether the tick loop is running.
    pub running: bool,
    /// When the tick loop started.
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    /// Finished cycles.
    pub cycles: u64,
    /// Cycles that stored (or deduplicated) a reading.
    pub succeeded: u64,
    /// Cycles that ended without a reading.
    pub failed: u64,
    /// Ticks skipped because a cycle was in flight.
    pub dropped_ticks: u64,
    /// Successful cycles whose reading was already stored.
    pub duplicates: u64,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Successful cycles per source.
    pub per_source: Vec<SourceCount>,
    /// The last finished cycle.
    pub last_result: Option<CollectionCycleResult>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use stationlog_types::ErrorKind;

    fn state() -> Arc<AppState> {
        AppState::new(Store::open_in_memory().unwrap(), Config::default())
    }

    fn success(source: Source, duplicate: bool) -> CollectionCycleResult {
        CollectionCycleResult::success(OffsetDateTime::now_utc(), source, 1, duplicate)
    }

    fn failure() -> CollectionCycleResult {
        CollectionCycleResult::failure(
            OffsetDateTime::now_utc(),
            ErrorKind::Aggregate,
            "All sources failed",
            3,
        )
    }

    #[tokio::test]
    async fn test_app_state_new() {
        let state = state();
        assert_eq!(state.collector.phase(), CollectorPhase::Idle);
        assert!(!state.collector.is_running());
        assert!(state.collector.started_at().is_none());
        assert!(state.collector.last_result().await.is_none());
    }

    #[test]
    fn test_cycle_guard_is_exclusive() {
        let collector = CollectorState::new();
        let guard = collector.try_begin_cycle().expect("idle collector");
        assert_eq!(collector.phase(), CollectorPhase::Collecting);
        assert!(collector.try_begin_cycle().is_none());

        guard.finish(true);
        assert_eq!(collector.phase(), CollectorPhase::Succeeded);
        assert!(collector.try_begin_cycle().is_none());

        drop(guard);
        assert_eq!(collector.phase(), CollectorPhase::Idle);
        assert!(collector.try_begin_cycle().is_some());
    }

    #[test]
    fn test_dropped_ticks_counted() {
        let collector = CollectorState::new();
        assert_eq!(collector.record_dropped_tick(), 1);
        assert_eq!(collector.record_dropped_tick(), 2);
    }

    #[tokio::test]
    async fn test_record_result_counters() {
        let collector = CollectorState::new();
        assert_eq!(collector.record_result(&failure()).await, 1);
        assert_eq!(collector.record_result(&failure()).await, 2);
        assert_eq!(
            collector
                .record_result(&success(Source::SecondaryClimate, false))
                .await,
            0
        );
        collector
            .record_result(&success(Source::PrimaryDevice, true))
            .await;

        let stats = collector.stats().await;
        assert_eq!(stats.cycles, 4);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.per_source[0].source, Source::PrimaryDevice);
        assert_eq!(stats.per_source[0].count, 1);
        assert_eq!(stats.per_source[1].count, 1);
        assert_eq!(stats.per_source[2].count, 0);
        assert_eq!(
            stats.last_result.unwrap().source_used,
            Some(Source::PrimaryDevice)
        );
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let collector = CollectorState::new();
        for _ in 0..HISTORY_CAPACITY + 5 {
            collector.record_result(&failure()).await;
        }
        collector
            .record_result(&success(Source::PrimaryDevice, false))
            .await;

        let recent = collector.recent_results(usize::MAX).await;
        assert_eq!(recent.len(), HISTORY_CAPACITY);
        assert!(recent[0].succeeded);
    }

    #[test]
    fn test_set_running_records_start() {
        let collector = CollectorState::new();
        collector.set_running(true);
        assert!(collector.is_running());
        assert!(collector.started_at().is_some());
        collector.set_running(false);
        assert!(!collector.is_running());
    }

    #[test]
    fn test_signal_stop_cancels_token() {
        let collector = CollectorState::new();
        let token = collector.shutdown_token();
        assert!(!token.is_cancelled());
        collector.signal_stop();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_phase_serialization() {
        assert_eq!(
            serde_json::to_string(&CollectorPhase::Collecting).unwrap(),
            "\"collecting\""
        );
        assert_eq!(CollectorPhase::Failed.as_str(), "failed");
    }
}
