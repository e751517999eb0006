//! Observability counters.
//!
//! Thread-safe counters for connection, handshake, and relay activity.
//! Each service owns its own [`Metrics`] instance behind an `Arc`; there
//! is no process-global collector.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Counter set shared by the tasks of one server or client.
#[derive(Debug)]
pub struct Metrics {
    /// Total connections accepted or dialed
    pub connections_total: AtomicU64,
    /// Currently open connections
    pub connections_active: AtomicU64,
    /// Wire records read
    pub records_in: AtomicU64,
    /// Wire records written
    pub records_out: AtomicU64,
    /// Bytes read as record payload
    pub bytes_in: AtomicU64,
    /// Bytes written as record payload
    pub bytes_out: AtomicU64,
    /// Handshakes begun (stage 1 seen or sent)
    pub handshakes_started: AtomicU64,
    /// Handshakes that reached `Established`
    pub handshakes_completed: AtomicU64,
    /// Handshakes that ended in `Failed`
    pub handshakes_failed: AtomicU64,
    /// Application payloads encrypted for sending
    pub messages_encrypted: AtomicU64,
    /// Application payloads decrypted on receipt
    pub messages_decrypted: AtomicU64,
    /// Records forwarded verbatim to another peer
    pub messages_relayed: AtomicU64,
    /// Records dropped because the receiver was not connected
    pub unknown_peer_drops: AtomicU64,
    /// Records carrying no field this protocol knows
    pub ignored_records: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            records_in: AtomicU64::new(0),
            records_out: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            handshakes_started: AtomicU64::new(0),
            handshakes_completed: AtomicU64::new(0),
            handshakes_failed: AtomicU64::new(0),
            messages_encrypted: AtomicU64::new(0),
            messages_decrypted: AtomicU64::new(0),
            messages_relayed: AtomicU64::new(0),
            unknown_peer_drops: AtomicU64::new(0),
            ignored_records: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.records_in.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_sent(&self, bytes: usize) {
        self.records_out.fetch_add(1, Ordering::Relaxed);
        self.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn handshake_started(&self) {
        self.handshakes_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_completed(&self) {
        self.handshakes_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_encrypted(&self) {
        self.messages_encrypted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_decrypted(&self) {
        self.messages_decrypted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_relayed(&self) {
        self.messages_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unknown_peer_dropped(&self) {
        self.unknown_peer_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ignored(&self) {
        self.ignored_records.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            records_in: self.records_in.load(Ordering::Relaxed),
            records_out: self.records_out.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            handshakes_started: self.handshakes_started.load(Ordering::Relaxed),
            handshakes_completed: self.handshakes_completed.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            messages_encrypted: self.messages_encrypted.load(Ordering::Relaxed),
            messages_decrypted: self.messages_decrypted.load(Ordering::Relaxed),
            messages_relayed: self.messages_relayed.load(Ordering::Relaxed),
            unknown_peer_drops: self.unknown_peer_drops.load(Ordering::Relaxed),
            ignored_records: self.ignored_records.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Emit the full counter set as one structured log line.
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            records_in = snapshot.records_in,
            records_out = snapshot.records_out,
            bytes_in = snapshot.bytes_in,
            bytes_out = snapshot.bytes_out,
            handshakes_started = snapshot.handshakes_started,
            handshakes_completed = snapshot.handshakes_completed,
            handshakes_failed = snapshot.handshakes_failed,
            messages_encrypted = snapshot.messages_encrypted,
            messages_decrypted = snapshot.messages_decrypted,
            messages_relayed = snapshot.messages_relayed,
            unknown_peer_drops = snapshot.unknown_peer_drops,
            ignored_records = snapshot.ignored_records,
            uptime_seconds = snapshot.uptime_seconds,
            "Rendezvous metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub records_in: u64,
    pub records_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub handshakes_started: u64,
    pub handshakes_completed: u64,
    pub handshakes_failed: u64,
    pub messages_encrypted: u64,
    pub messages_decrypted: u64,
    pub messages_relayed: u64,
    pub unknown_peer_drops: u64,
    pub ignored_records: u64,
    pub uptime_seconds: u64,
}

/// Timer for measuring operation duration.
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}
