//! Owns the snapshot loader, every channel, and the shared merger.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

use dashsync_config::{DashboardConfig, LogKind};
use dashsync_core::{
    create_metrics, EventLogEntry, Frame, FrameHandler, MergeOutcome, MetricsSnapshot,
    SharedMetrics, SnapshotSource, StateMerger, SyncError, Transport, ViewModel,
};

use crate::channel::{ChannelConnection, ChannelState, SendStatus};
use crate::reconnect::{policy_from_config, ReconnectPolicy, ReconnectState};
use crate::snapshot::{SnapshotLoader, SnapshotReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Stopped,
}

/// Routes channel frames into the shared merger.
struct MergerHandle {
    merger: Arc<RwLock<StateMerger>>,
    metrics: SharedMetrics,
}

#[async_trait]
impl FrameHandler for MergerHandle {
    async fn on_frame(&self, channel: &str, frame: &Frame) {
        let outcome = self.merger.write().await.apply(frame);
        match outcome {
            MergeOutcome::Ignored => {
                self.metrics.record_ignored();
                debug!(channel = %channel, kind = %frame.kind, "frame ignored");
            }
            _ => self.metrics.record_applied(),
        }
    }
}

/// Result of a manual refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub snapshot: SnapshotReport,
    /// Channels that were open and got a `refresh_stats` frame.
    pub refreshed_channels: Vec<String>,
}

/// Drives the initial snapshot plus one reconnecting channel per
/// configured logical channel, all folding into one [`StateMerger`].
///
/// An instance runs once: after [`stop`](Self::stop) it cannot be
/// restarted.
pub struct DashboardSyncCoordinator {
    merger: Arc<RwLock<StateMerger>>,
    loader: SnapshotLoader,
    channels: Vec<ChannelConnection>,
    lifecycle: Mutex<Lifecycle>,
    metrics: SharedMetrics,
}

impl DashboardSyncCoordinator {
    /// Build a coordinator using the reconnect policy from `config`.
    pub fn new(
        config: &DashboardConfig,
        transport: Arc<dyn Transport>,
        source: Arc<dyn SnapshotSource>,
    ) -> Self {
        let policy = policy_from_config(&config.reconnect);
        Self::with_policy(config, transport, source, policy)
    }

    pub fn with_policy(
        config: &DashboardConfig,
        transport: Arc<dyn Transport>,
        source: Arc<dyn SnapshotSource>,
        policy: Arc<dyn ReconnectPolicy>,
    ) -> Self {
        let config = config.effective();
        let metrics = create_metrics();
        let merger = Arc::new(RwLock::new(StateMerger::from_config(&config)));
        let loader = SnapshotLoader::from_config(&config.snapshot, source, metrics.clone());

        let channels = config
            .channels
            .iter()
            .map(|channel| {
                let conn = ChannelConnection::new(
                    channel.name.clone(),
                    Arc::clone(&transport),
                    Arc::clone(&policy),
                    channel.pending_send.unwrap_or(config.buffers.pending_send),
                    metrics.clone(),
                );
                conn.on_message(Arc::new(MergerHandle {
                    merger: Arc::clone(&merger),
                    metrics: metrics.clone(),
                }));
                conn
            })
            .collect();

        DashboardSyncCoordinator {
            merger,
            loader,
            channels,
            lifecycle: Mutex::new(Lifecycle::Created),
            metrics,
        }
    }

    /// Open every channel, then run the initial snapshot fetch.
    ///
    /// Frames that arrive while the snapshot is in flight are applied
    /// immediately; whichever write lands last wins.
    pub async fn start(&self) -> Result<SnapshotReport, SyncError> {
        {
            let mut lifecycle = self.lifecycle.lock();
            match *lifecycle {
                Lifecycle::Stopped => return Err(SyncError::CoordinatorStopped),
                Lifecycle::Running => return Err(SyncError::AlreadyStarted),
                Lifecycle::Created => *lifecycle = Lifecycle::Running,
            }
        }

        info!(channels = self.channels.len(), "starting dashboard sync");
        for channel in &self.channels {
            channel.open()?;
        }
        Ok(self.loader.fetch_initial(&self.merger).await)
    }

    /// Re-run the snapshot fetch and ask every open channel for fresh stats.
    pub async fn manual_refresh(&self) -> Result<RefreshReport, SyncError> {
        self.ensure_not_stopped()?;

        let mut refreshed_channels = Vec::new();
        let refresh = Frame::refresh_stats();
        for channel in &self.channels {
            if channel.send_if_open(&refresh).await? {
                refreshed_channels.push(channel.name().to_string());
            }
        }

        let snapshot = self.loader.fetch_initial(&self.merger).await;
        Ok(RefreshReport {
            snapshot,
            refreshed_channels,
        })
    }

    /// Close every channel and cancel pending reconnects. Idempotent.
    pub async fn stop(&self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle == Lifecycle::Stopped {
                return;
            }
            *lifecycle = Lifecycle::Stopped;
        }

        for channel in &self.channels {
            channel.close().await;
        }
        info!("dashboard sync stopped");
    }

    pub fn is_stopped(&self) -> bool {
        *self.lifecycle.lock() == Lifecycle::Stopped
    }

    /// Send a frame on one channel, queueing while it is not open.
    pub async fn send(&self, channel: &str, frame: &Frame) -> Result<SendStatus, SyncError> {
        self.ensure_not_stopped()?;
        self.channel(channel)?.send(frame).await
    }

    /// Copy of the current view model.
    pub async fn view_model(&self) -> ViewModel {
        self.merger.read().await.view().clone()
    }

    /// Activity feed, newest first.
    pub async fn activity(&self) -> Vec<EventLogEntry> {
        self.merger.read().await.log(LogKind::Activity).snapshot()
    }

    /// Raw event stream, newest first.
    pub async fn events(&self) -> Vec<EventLogEntry> {
        self.merger.read().await.log(LogKind::Events).snapshot()
    }

    pub fn channel_state(&self, name: &str) -> Result<ChannelState, SyncError> {
        Ok(self.channel(name)?.state())
    }

    pub fn channel_states(&self) -> Vec<(String, ChannelState)> {
        self.channels
            .iter()
            .map(|c| (c.name().to_string(), c.state()))
            .collect()
    }

    pub fn subscribe_state(&self, name: &str) -> Result<watch::Receiver<ChannelState>, SyncError> {
        Ok(self.channel(name)?.subscribe_state())
    }

    pub fn reconnect_state(&self, name: &str) -> Result<ReconnectState, SyncError> {
        Ok(self.channel(name)?.reconnect_state())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn channel(&self, name: &str) -> Result<&ChannelConnection, SyncError> {
        self.channels
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| SyncError::UnknownChannel(name.to_string()))
    }

    fn ensure_not_stopped(&self) -> Result<(), SyncError> {
        if self.is_stopped() {
            Err(SyncError::CoordinatorStopped)
        } else {
            Ok(())
        }
    }
}
