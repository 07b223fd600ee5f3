//! Process-wide connection statistics.
//!
//! Counters are observability-only: nothing in the pipeline gates on them.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Snapshot of connection statistics at a point in time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatisticsSnapshot {
    /// Frames admitted by the version detector.
    pub frames_received: u64,
    /// Frames dropped because their version is unsupported.
    pub frames_dropped_version: u64,
    /// PACKET_IN frames shed while the filter was enabled.
    pub packet_ins_filtered: u64,
    /// Frames successfully decoded into structured messages.
    pub messages_decoded: u64,
    /// Frames the external codec declined or failed on.
    pub decode_failures: u64,
    /// Messages successfully encoded onto the wire.
    pub messages_encoded: u64,
    /// Outbound messages the external codec failed on.
    pub encode_failures: u64,
    /// Connections admitted and assembled.
    pub connections_opened: u64,
    /// Connections that have ended, for any reason.
    pub connections_closed: u64,
    /// Switch-idle notifications emitted.
    pub idle_events: u64,
}

/// Thread-safe statistics collector shared by all connections of a provider.
#[derive(Debug, Default)]
pub struct ConnectionStatistics {
    frames_received: AtomicU64,
    frames_dropped_version: AtomicU64,
    packet_ins_filtered: AtomicU64,
    messages_decoded: AtomicU64,
    decode_failures: AtomicU64,
    messages_encoded: AtomicU64,
    encode_failures: AtomicU64,
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    idle_events: AtomicU64,
}

impl ConnectionStatistics {
    /// Creates a zeroed collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a frame admitted by the version detector.
    pub fn inc_frames_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a frame dropped for an unsupported version.
    pub fn inc_frames_dropped_version(&self) {
        self.frames_dropped_version.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a PACKET_IN frame shed by the filter.
    pub fn inc_packet_ins_filtered(&self) {
        self.packet_ins_filtered.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful decode.
    pub fn inc_messages_decoded(&self) {
        self.messages_decoded.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed or declined decode.
    pub fn inc_decode_failures(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful encode.
    pub fn inc_messages_encoded(&self) {
        self.messages_encoded.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed encode.
    pub fn inc_encode_failures(&self) {
        self.encode_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an assembled connection.
    pub fn inc_connections_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a closed connection.
    pub fn inc_connections_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an emitted switch-idle notification.
    pub fn inc_idle_events(&self) {
        self.idle_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a consistent-enough snapshot of all counters.
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped_version: self.frames_dropped_version.load(Ordering::Relaxed),
            packet_ins_filtered: self.packet_ins_filtered.load(Ordering::Relaxed),
            messages_decoded: self.messages_decoded.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            messages_encoded: self.messages_encoded.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            idle_events: self.idle_events.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = ConnectionStatistics::new();
        stats.inc_frames_received();
        stats.inc_frames_received();
        stats.inc_packet_ins_filtered();
        stats.inc_decode_failures();
        let snap = stats.snapshot();
        assert_eq!(snap.frames_received, 2);
        assert_eq!(snap.packet_ins_filtered, 1);
        assert_eq!(snap.decode_failures, 1);
        assert_eq!(snap.messages_decoded, 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = ConnectionStatistics::new();
        stats.inc_connections_opened();
        let json = serde_json::to_string(&stats.snapshot()).unwrap();
        assert!(json.contains("\"connections_opened\":1"));
    }
}
