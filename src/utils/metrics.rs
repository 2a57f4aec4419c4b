//! Observability and Metrics
//!
//! Per-transport counters for datagram traffic, dedup and reliability.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector owned by one transport
#[derive(Debug)]
pub struct Metrics {
    /// Datagrams read from the socket
    pub datagrams_received: AtomicU64,
    /// Datagrams written to the socket
    pub datagrams_sent: AtomicU64,
    /// Total bytes received
    pub bytes_received: AtomicU64,
    /// Total bytes sent
    pub bytes_sent: AtomicU64,
    /// Datagrams that failed to decode
    pub malformed: AtomicU64,
    /// Datagrams from addresses with no active circuit
    pub unknown_circuit: AtomicU64,
    /// Unexpected duplicates (no resent flag)
    pub duplicates: AtomicU64,
    /// Duplicates carrying the resent flag
    pub expected_resends: AtomicU64,
    /// Outbound sequences acknowledged by peers
    pub acks_received: AtomicU64,
    /// Reliable packets retransmitted
    pub resends_sent: AtomicU64,
    /// Reliable packets given up on after the resend limit
    pub resends_dropped: AtomicU64,
    /// Packets delivered to handlers
    pub dispatched: AtomicU64,
    /// Queued packets skipped because their circuit closed
    pub dropped_closed: AtomicU64,
    /// Socket sends that returned an error
    pub send_failures: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            datagrams_received: AtomicU64::new(0),
            datagrams_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            unknown_circuit: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            expected_resends: AtomicU64::new(0),
            acks_received: AtomicU64::new(0),
            resends_sent: AtomicU64::new(0),
            resends_dropped: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            dropped_closed: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn datagram_received(&self, byte_count: u64) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn datagram_sent(&self, byte_count: u64) {
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn malformed_datagram(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unknown_circuit(&self) {
        self.unknown_circuit.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a dropped duplicate, split by whether it was an announced resend
    pub fn duplicate(&self, resent: bool) {
        if resent {
            self.expected_resends.fetch_add(1, Ordering::Relaxed);
        } else {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn acks_received(&self, count: u64) {
        self.acks_received.fetch_add(count, Ordering::Relaxed);
    }

    pub fn resend_sent(&self) {
        self.resends_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resend_dropped(&self) {
        self.resends_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_closed(&self) {
        self.dropped_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn send_failed(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            unknown_circuit: self.unknown_circuit.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            expected_resends: self.expected_resends.load(Ordering::Relaxed),
            acks_received: self.acks_received.load(Ordering::Relaxed),
            resends_sent: self.resends_sent.load(Ordering::Relaxed),
            resends_dropped: self.resends_dropped.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dropped_closed: self.dropped_closed.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_snapshot(&self) {
        let snapshot = self.snapshot();
        info!(
            datagrams_received = snapshot.datagrams_received,
            datagrams_sent = snapshot.datagrams_sent,
            bytes_received = snapshot.bytes_received,
            bytes_sent = snapshot.bytes_sent,
            malformed = snapshot.malformed,
            unknown_circuit = snapshot.unknown_circuit,
            duplicates = snapshot.duplicates,
            expected_resends = snapshot.expected_resends,
            acks_received = snapshot.acks_received,
            resends_sent = snapshot.resends_sent,
            resends_dropped = snapshot.resends_dropped,
            dispatched = snapshot.dispatched,
            dropped_closed = snapshot.dropped_closed,
            send_failures = snapshot.send_failures,
            uptime_seconds = snapshot.uptime_seconds,
            "Transport metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub datagrams_received: u64,
    pub datagrams_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub malformed: u64,
    pub unknown_circuit: u64,
    pub duplicates: u64,
    pub expected_resends: u64,
    pub acks_received: u64,
    pub resends_sent: u64,
    pub resends_dropped: u64,
    pub dispatched: u64,
    pub dropped_closed: u64,
    pub send_failures: u64,
    pub uptime_seconds: u64,
}
