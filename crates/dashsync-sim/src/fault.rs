use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde_json::Value;
use tokio::sync::Mutex;

use dashsync_core::{SnapshotSource, SyncError, Transport, TransportLink};

/// Prefix used in error messages to distinguish injected faults from real errors.
pub const FAULT_PREFIX: &str = "[fault-injected]";

/// Configuration for fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability that a connect attempt is refused (0.0-1.0).
    pub connect_failure_rate: f64,
    /// Probability that a snapshot sub-request fails (0.0-1.0).
    pub snapshot_failure_rate: f64,
}

/// Statistics about injected faults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultStats {
    pub refused_connects: usize,
    pub failed_snapshots: usize,
}

pub fn is_injected_fault(msg: &str) -> bool {
    msg.contains(FAULT_PREFIX)
}

/// Shared, seeded coin flipper.
#[derive(Clone)]
pub struct FaultDice {
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl FaultDice {
    pub fn new(rng: ChaCha8Rng) -> Self {
        FaultDice {
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    async fn roll(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        let roll: f64 = self.rng.lock().await.gen();
        roll < rate
    }
}

/// A transport wrapper that randomly refuses connects.
pub struct FaultyTransport {
    inner: Arc<dyn Transport>,
    dice: FaultDice,
    rate: f64,
    refused: AtomicUsize,
}

impl FaultyTransport {
    pub fn new(inner: Arc<dyn Transport>, dice: FaultDice, config: &FaultConfig) -> Self {
        FaultyTransport {
            inner,
            dice,
            rate: config.connect_failure_rate,
            refused: AtomicUsize::new(0),
        }
    }

    pub fn refused(&self) -> usize {
        self.refused.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for FaultyTransport {
    async fn connect(&self, channel: &str) -> Result<TransportLink, SyncError> {
        if self.dice.roll(self.rate).await {
            self.refused.fetch_add(1, Ordering::Relaxed);
            return Err(SyncError::transport(
                channel,
                format!("{} connection refused", FAULT_PREFIX),
            ));
        }
        self.inner.connect(channel).await
    }

    fn name(&self) -> &str {
        "faulty"
    }
}

/// A snapshot source wrapper that randomly fails sub-requests.
pub struct FaultySnapshotSource {
    inner: Arc<dyn SnapshotSource>,
    dice: FaultDice,
    rate: f64,
    failed: AtomicUsize,
}

impl FaultySnapshotSource {
    pub fn new(inner: Arc<dyn SnapshotSource>, dice: FaultDice, config: &FaultConfig) -> Self {
        FaultySnapshotSource {
            inner,
            dice,
            rate: config.snapshot_failure_rate,
            failed: AtomicUsize::new(0),
        }
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SnapshotSource for FaultySnapshotSource {
    async fn fetch(&self, endpoint: &str, path: &str) -> Result<Value, SyncError> {
        if self.dice.roll(self.rate).await {
            self.failed.fetch_add(1, Ordering::Relaxed);
            return Err(SyncError::SnapshotFetch {
                endpoint: endpoint.to_string(),
                reason: format!("{} HTTP 503", FAULT_PREFIX),
            });
        }
        self.inner.fetch(endpoint, path).await
    }
}
