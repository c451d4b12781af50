//! Server counters.
//!
//! One [`Metrics`] is shared by the server and all of its connections.
//! Counters are relaxed atomics; a [`MetricsSnapshot`] is a consistent-enough
//! copy for logs and tests, not a transactional view.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

#[derive(Debug, Default)]
struct Counter(AtomicU64);

impl Counter {
    fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    fn bump(&self) {
        self.add(1);
    }

    fn drop_one(&self) {
        // Saturate: a close without a matching open must not wrap
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct Metrics {
    connections_total: Counter,
    connections_active: Counter,
    connections_rejected: Counter,
    handshakes_total: Counter,
    handshakes_success: Counter,
    handshakes_failed: Counter,
    packets_sent: Counter,
    packets_received: Counter,
    bytes_sent: Counter,
    bytes_received: Counter,
    unknown_headers: Counter,
    protocol_errors: Counter,
    handler_failures: Counter,
    started: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_total: Counter::default(),
            connections_active: Counter::default(),
            connections_rejected: Counter::default(),
            handshakes_total: Counter::default(),
            handshakes_success: Counter::default(),
            handshakes_failed: Counter::default(),
            packets_sent: Counter::default(),
            packets_received: Counter::default(),
            bytes_sent: Counter::default(),
            bytes_received: Counter::default(),
            unknown_headers: Counter::default(),
            protocol_errors: Counter::default(),
            handler_failures: Counter::default(),
            started: Instant::now(),
        }
    }

    pub fn connection_established(&self) {
        self.connections_total.bump();
        self.connections_active.bump();
    }

    pub fn connection_closed(&self) {
        self.connections_active.drop_one();
    }

    /// Turned away at the connection limit.
    pub fn connection_rejected(&self) {
        self.connections_rejected.bump();
    }

    pub fn handshake_attempt(&self) {
        self.handshakes_total.bump();
    }

    pub fn handshake_success(&self) {
        self.handshakes_success.bump();
    }

    pub fn handshake_failed(&self) {
        self.handshakes_failed.bump();
    }

    pub fn packet_sent(&self, bytes: u64) {
        self.packets_sent.bump();
        self.bytes_sent.add(bytes);
    }

    pub fn packet_received(&self, bytes: u64) {
        self.packets_received.bump();
        self.bytes_received.add(bytes);
    }

    pub fn unknown_header(&self) {
        self.unknown_headers.bump();
    }

    /// Any fault that closed a connection.
    pub fn protocol_error(&self) {
        self.protocol_errors.bump();
    }

    /// A handler returned an error or panicked.
    pub fn handler_failure(&self) {
        self.handler_failures.bump();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.get(),
            connections_active: self.connections_active.get(),
            connections_rejected: self.connections_rejected.get(),
            handshakes_total: self.handshakes_total.get(),
            handshakes_success: self.handshakes_success.get(),
            handshakes_failed: self.handshakes_failed.get(),
            packets_sent: self.packets_sent.get(),
            packets_received: self.packets_received.get(),
            bytes_sent: self.bytes_sent.get(),
            bytes_received: self.bytes_received.get(),
            unknown_headers: self.unknown_headers.get(),
            protocol_errors: self.protocol_errors.get(),
            handler_failures: self.handler_failures.get(),
            uptime_seconds: self.started.elapsed().as_secs(),
        }
    }

    /// Emit the current counters as one `info!` event.
    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            uptime_seconds = s.uptime_seconds,
            connections = s.connections_total,
            active = s.connections_active,
            rejected = s.connections_rejected,
            handshakes = s.handshakes_total,
            handshakes_ok = s.handshakes_success,
            handshakes_failed = s.handshakes_failed,
            packets_in = s.packets_received,
            packets_out = s.packets_sent,
            bytes_in = s.bytes_received,
            bytes_out = s.bytes_sent,
            unknown_headers = s.unknown_headers,
            protocol_errors = s.protocol_errors,
            handler_failures = s.handler_failures,
            "Server metrics"
        );
    }
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub connections_rejected: u64,
    pub handshakes_total: u64,
    pub handshakes_success: u64,
    pub handshakes_failed: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub unknown_headers: u64,
    pub protocol_errors: u64,
    pub handler_failures: u64,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_feed_the_snapshot() {
        let metrics = Metrics::new();
        metrics.connection_established();
        metrics.connection_established();
        metrics.connection_closed();
        metrics.packet_received(10);
        metrics.packet_sent(2);
        metrics.packet_sent(13);
        metrics.unknown_header();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_total, 2);
        assert_eq!(snapshot.connections_active, 1);
        assert_eq!(snapshot.packets_received, 1);
        assert_eq!(snapshot.bytes_received, 10);
        assert_eq!(snapshot.packets_sent, 2);
        assert_eq!(snapshot.bytes_sent, 15);
        assert_eq!(snapshot.unknown_headers, 1);
        assert_eq!(snapshot.handler_failures, 0);
    }

    #[test]
    fn active_connections_never_wrap() {
        let metrics = Metrics::new();
        metrics.connection_closed();
        assert_eq!(metrics.snapshot().connections_active, 0);
    }
}
