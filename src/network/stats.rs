//! Server counters, updated lock-free from every worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::info;

/// Node statistics
#[derive(Debug, Default)]
pub struct NodeStats {
    connections_total: AtomicU64,
    connections_active: AtomicU64,
    connections_rejected: AtomicU64,
    messages_decoded: AtomicU64,
    bytes_received: AtomicU64,
    decode_errors: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub connections_rejected: u64,
    pub messages_decoded: u64,
    pub bytes_received: u64,
    pub decode_errors: u64,
}

impl NodeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self, bytes: u64, messages: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
        self.messages_decoded.fetch_add(messages, Ordering::Relaxed);
    }

    pub(crate) fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> u64 {
        self.connections_active.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            messages_decoded: self.messages_decoded.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }

    /// Emit one info line with rates over `uptime`.
    pub fn log(&self, uptime: Duration) {
        let snap = self.snapshot();
        let secs = uptime.as_secs_f64().max(f64::EPSILON);
        info!(
            uptime_secs = uptime.as_secs(),
            connections = snap.connections_active,
            rejected = snap.connections_rejected,
            messages = snap.messages_decoded,
            msg_rate = snap.messages_decoded as f64 / secs,
            kb_in = snap.bytes_received / 1024,
            decode_errors = snap.decode_errors,
            "node stats"
        );
    }
}
