use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Counters for one coordinator instance.
#[derive(Debug, Default)]
pub struct SyncMetrics {
    // Inbound
    pub frames_received: AtomicU64,
    pub frames_applied: AtomicU64,
    pub frames_ignored: AtomicU64,
    pub frames_malformed: AtomicU64,

    // Outbound
    pub frames_sent: AtomicU64,
    pub frames_queued: AtomicU64,
    pub frames_dropped: AtomicU64,

    // Connection lifecycle
    pub connections_opened: AtomicU64,
    pub disconnects: AtomicU64,
    pub reconnect_attempts: AtomicU64,
    pub connections_lost: AtomicU64,

    // Snapshot
    pub snapshot_loaded: AtomicU64,
    pub snapshot_failed: AtomicU64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_applied(&self) {
        self.frames_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ignored(&self) {
        self.frames_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.frames_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame parked in a pending queue; `dropped` is how many
    /// older frames it pushed out.
    pub fn record_queued(&self, dropped: u64) {
        self.frames_queued.fetch_add(1, Ordering::Relaxed);
        self.frames_dropped.fetch_add(dropped, Ordering::Relaxed);
    }

    pub fn record_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot_loaded(&self) {
        self.snapshot_loaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot_failed(&self) {
        self.snapshot_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of the current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_applied: self.frames_applied.load(Ordering::Relaxed),
            frames_ignored: self.frames_ignored.load(Ordering::Relaxed),
            frames_malformed: self.frames_malformed.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_queued: self.frames_queued.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            connections_lost: self.connections_lost.load(Ordering::Relaxed),
            snapshot_loaded: self.snapshot_loaded.load(Ordering::Relaxed),
            snapshot_failed: self.snapshot_failed.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub frames_received: u64,
    pub frames_applied: u64,
    pub frames_ignored: u64,
    pub frames_malformed: u64,
    pub frames_sent: u64,
    pub frames_queued: u64,
    pub frames_dropped: u64,
    pub connections_opened: u64,
    pub disconnects: u64,
    pub reconnect_attempts: u64,
    pub connections_lost: u64,
    pub snapshot_loaded: u64,
    pub snapshot_failed: u64,
}

/// Shared metrics handle.
pub type SharedMetrics = Arc<SyncMetrics>;

/// Create a new shared metrics instance.
pub fn create_metrics() -> SharedMetrics {
    Arc::new(SyncMetrics::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_counters() {
        let metrics = SyncMetrics::new();
        metrics.record_received();
        metrics.record_received();
        metrics.record_applied();
        metrics.record_malformed();

        let snap = metrics.snapshot();
        assert_eq!(snap.frames_received, 2);
        assert_eq!(snap.frames_applied, 1);
        assert_eq!(snap.frames_malformed, 1);
        assert_eq!(snap.frames_ignored, 0);
    }

    #[test]
    fn test_queue_records_drops() {
        let metrics = SyncMetrics::new();
        metrics.record_queued(0);
        metrics.record_queued(1);
        let snap = metrics.snapshot();
        assert_eq!(snap.frames_queued, 2);
        assert_eq!(snap.frames_dropped, 1);
    }

    #[test]
    fn test_shared_handle() {
        let metrics = create_metrics();
        let clone = Arc::clone(&metrics);
        clone.record_reconnect_attempt();
        clone.record_lost();
        let snap = metrics.snapshot();
        assert_eq!(snap.reconnect_attempts, 1);
        assert_eq!(snap.connections_lost, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(SyncMetrics::new().snapshot()).unwrap();
        assert_eq!(json["snapshot_failed"], 0);
    }
}
