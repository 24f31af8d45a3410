//! Observability and Metrics
//!
//! Metrics collection for monitoring pipeline throughput and session
//! health. Uses atomic counters for thread-safe collection; the pump, the
//! dispatcher, and the timer thread all record here without coordination.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Counters for one process's protocol activity.
#[derive(Debug)]
pub struct Metrics {
    /// Total connections established
    pub connections_total: AtomicU64,
    /// Total frames received off the wire
    pub frames_received: AtomicU64,
    /// Total frames written to the wire
    pub frames_sent: AtomicU64,
    /// Total payload bytes received
    pub bytes_received: AtomicU64,
    /// Total payload bytes sent
    pub bytes_sent: AtomicU64,
    /// Frames dropped because no handler was registered
    pub frames_unhandled: AtomicU64,
    /// Handler invocations that returned an error
    pub handler_faults: AtomicU64,
    /// Handshakes that reached chat
    pub handshakes_success: AtomicU64,
    /// Handshakes that failed
    pub handshakes_failed: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            frames_unhandled: AtomicU64::new(0),
            handler_faults: AtomicU64::new(0),
            handshakes_success: AtomicU64::new(0),
            handshakes_failed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_received(&self, payload_bytes: u64) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(payload_bytes, Ordering::Relaxed);
    }

    pub fn frame_sent(&self, payload_bytes: u64) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(payload_bytes, Ordering::Relaxed);
    }

    pub fn frame_unhandled(&self) {
        self.frames_unhandled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_fault(&self) {
        self.handler_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_success(&self) {
        self.handshakes_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            frames_unhandled: self.frames_unhandled.load(Ordering::Relaxed),
            handler_faults: self.handler_faults.load(Ordering::Relaxed),
            handshakes_success: self.handshakes_success.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            frames_received = snapshot.frames_received,
            frames_sent = snapshot.frames_sent,
            bytes_received = snapshot.bytes_received,
            bytes_sent = snapshot.bytes_sent,
            frames_unhandled = snapshot.frames_unhandled,
            handler_faults = snapshot.handler_faults,
            handshakes_success = snapshot.handshakes_success,
            handshakes_failed = snapshot.handshakes_failed,
            uptime_seconds = snapshot.uptime_seconds,
            "Protocol metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub frames_received: u64,
    pub frames_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub frames_unhandled: u64,
    pub handler_faults: u64,
    pub handshakes_success: u64,
    pub handshakes_failed: u64,
    pub uptime_seconds: u64,
}

/// Global metrics instance (lazy static for simplicity)
static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}
