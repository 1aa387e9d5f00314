//! Request metrics tracking.
//!
//! This module provides lock-free counters for the outbound calls made by
//! the cloud client and the climate source: call counts, failures and
//! latencies per operation, plus the clock-drift flag counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Metrics for a single operation type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationMetrics {
    /// Total number of calls.
    pub count: u64,
    /// Number of successful calls.
    pub success_count: u64,
    /// Number of failed calls.
    pub failure_count: u64,
    /// Total duration of all calls.
    pub total_duration_ms: u64,
    /// Fastest call.
    pub min_duration_ms: Option<u64>,
    /// Slowest call.
    pub max_duration_ms: Option<u64>,
    /// Mean call duration.
    pub avg_duration_ms: Option<f64>,
}

/// Thread-safe atomic operation metrics tracker.
#[derive(Debug)]
pub struct AtomicOperationMetrics {
    count: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    total_duration_ms: AtomicU64,
    min_duration_ms: AtomicU64,
    max_duration_ms: AtomicU64,
}

impl Default for AtomicOperationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicOperationMetrics {
    /// Create new empty metrics.
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            min_duration_ms: AtomicU64::new(u64::MAX),
            max_duration_ms: AtomicU64::new(0),
        }
    }

    /// Record the outcome of one call.
    pub fn record(&self, succeeded: bool, duration: Duration) {
        let ms = duration.as_millis() as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        if succeeded {
            self.success_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failure_count.fetch_add(1, Ordering::Relaxed);
        }
        self.total_duration_ms.fetch_add(ms, Ordering::Relaxed);
        self.min_duration_ms.fetch_min(ms, Ordering::Relaxed);
        self.max_duration_ms.fetch_max(ms, Ordering::Relaxed);
    }

    /// Get a snapshot of the current metrics.
    pub fn snapshot(&self) -> OperationMetrics {
        let count = self.count.load(Ordering::Relaxed);
        let total_duration_ms = self.total_duration_ms.load(Ordering::Relaxed);
        let min = self.min_duration_ms.load(Ordering::Relaxed);

        OperationMetrics {
            count,
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            total_duration_ms,
            min_duration_ms: (min != u64::MAX).then_some(min),
            max_duration_ms: (count > 0).then(|| self.max_duration_ms.load(Ordering::Relaxed)),
            avg_duration_ms: (count > 0).then(|| total_duration_ms as f64 / count as f64),
        }
    }
}

/// Outbound call kinds that are tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `GET /v1.0/token`.
    TokenExchange,
    /// `GET /v1.0/devices/{id}/status`.
    DeviceStatus,
    /// Device info and device list calls.
    DeviceInfo,
    /// Secondary climate service.
    Climate,
}

impl Operation {
    /// Label used in logs and metrics output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::TokenExchange => "token_exchange",
            Operation::DeviceStatus => "device_status",
            Operation::DeviceInfo => "device_info",
            Operation::Climate => "climate",
        }
    }
}

/// All request metrics of one client stack.
#[derive(Debug, Default)]
pub struct ClientMetrics {
    token_exchange: AtomicOperationMetrics,
    device_status: AtomicOperationMetrics,
    device_info: AtomicOperationMetrics,
    climate: AtomicOperationMetrics,
    clock_drift_flags: AtomicU64,
}

impl ClientMetrics {
    /// Create empty metrics.
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, operation: Operation) -> &AtomicOperationMetrics {
        match operation {
            Operation::TokenExchange => &self.token_exchange,
            Operation::DeviceStatus => &self.device_status,
            Operation::DeviceInfo => &self.device_info,
            Operation::Climate => &self.climate,
        }
    }

    /// Record the outcome of one call.
    pub fn record(&self, operation: Operation, succeeded: bool, duration: Duration) {
        self.slot(operation).record(succeeded, duration);
    }

    /// Count a reading whose device timestamp disagreed with the request time.
    pub fn record_clock_drift(&self) {
        self.clock_drift_flags.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of every counter.
    pub fn snapshot(&self) -> ClientMetricsSnapshot {
        ClientMetricsSnapshot {
            token_exchange: self.token_exchange.snapshot(),
            device_status: self.device_status.snapshot(),
            device_info: self.device_info.snapshot(),
            climate: self.climate.snapshot(),
            clock_drift_flags: self.clock_drift_flags.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`ClientMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientMetricsSnapshot {
    /// Token exchanges.
    pub token_exchange: OperationMetrics,
    /// Device status reads.
    pub device_status: OperationMetrics,
    /// Device info and list reads.
    pub device_info: OperationMetrics,
    /// Secondary climate reads.
    pub climate: OperationMetrics,
    /// Readings keyed on request time because the device clock disagreed.
    pub clock_drift_flags: u64,
}

impl ClientMetricsSnapshot {
    /// Iterate `(label, metrics)` pairs in a stable order.
    pub fn operations(&self) -> [(&'static str, &OperationMetrics); 4] {
        [
            (Operation::TokenExchange.as_str(), &self.token_exchange),
            (Operation::DeviceStatus.as_str(), &self.device_status),
            (Operation::DeviceInfo.as_str(), &self.device_info),
            (Operation::Climate.as_str(), &self.climate),
        ]
    }
}
