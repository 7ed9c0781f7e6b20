// ABOUTME: Metrics and observability for the connector pool
//
// Tracks:
// - Pool: dials, dial failures, reuses, removals
// - Connections: requests sent, responses routed or dropped, pings

use std::sync::atomic::{AtomicU64, Ordering};

/// Pool-level metrics
#[derive(Debug, Default)]
pub struct PoolMetrics {
    pub connections_dialed: AtomicU64,
    pub dial_failures: AtomicU64,
    pub connections_reused: AtomicU64,
    pub connections_removed: AtomicU64,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_dialed(&self) {
        self.connections_dialed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dial_failed(&self) {
        self.dial_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_reused(&self) {
        self.connections_reused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_removed(&self) {
        self.connections_removed.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            connections_dialed: self.connections_dialed.load(Ordering::Relaxed),
            dial_failures: self.dial_failures.load(Ordering::Relaxed),
            connections_reused: self.connections_reused.load(Ordering::Relaxed),
            connections_removed: self.connections_removed.load(Ordering::Relaxed),
        }
    }
}

/// Copy of [`PoolMetrics`] at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolMetricsSnapshot {
    pub connections_dialed: u64,
    pub dial_failures: u64,
    pub connections_reused: u64,
    pub connections_removed: u64,
}

/// Per-connection metrics
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    pub requests_sent: AtomicU64,
    pub responses_routed: AtomicU64,
    pub responses_dropped: AtomicU64,
    pub pings_sent: AtomicU64,
}

impl ConnectionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn response_routed(&self) {
        self.responses_routed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn response_dropped(&self) {
        self.responses_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ping_sent(&self) {
        self.pings_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    pub fn pings(&self) -> u64 {
        self.pings_sent.load(Ordering::Relaxed)
    }
}
