//! One reconnecting push channel.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex as SyncMutex, RwLock as SyncRwLock};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use dashsync_core::{
    Frame, FrameHandler, SharedMetrics, SyncError, Transport, TransportEvent, TransportLink,
};

use crate::reconnect::{DisconnectCause, ReconnectPolicy, ReconnectState};

/// Lifecycle state of a channel. Exactly one holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Constructed, never opened.
    Idle,
    Connecting,
    Open,
    /// Lost; a reconnect timer is armed.
    WaitingToRetry,
    /// Closed by its owner. Terminal.
    Closed,
    /// The reconnect policy gave up. `open()` may be called again.
    Lost,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelState::Idle => "idle",
            ChannelState::Connecting => "connecting",
            ChannelState::Open => "open",
            ChannelState::WaitingToRetry => "waiting_to_retry",
            ChannelState::Closed => "closed",
            ChannelState::Lost => "lost",
        };
        f.write_str(s)
    }
}

/// What `send()` did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Handed to the open link.
    Sent,
    /// Parked in the pending queue until the next open.
    Queued,
    /// Parked, and the oldest pending frame was dropped to make room.
    QueuedDroppedOldest,
}

struct Outbox {
    link: Option<mpsc::Sender<String>>,
    pending: VecDeque<String>,
    capacity: usize,
    closed: bool,
}

impl Outbox {
    /// Returns how many frames were dropped.
    fn enqueue(&mut self, text: String) -> u64 {
        if self.capacity == 0 {
            return 1;
        }
        let mut dropped = 0;
        while self.pending.len() >= self.capacity {
            self.pending.pop_front();
            dropped += 1;
        }
        self.pending.push_back(text);
        dropped
    }
}

struct ChannelInner {
    name: String,
    transport: Arc<dyn Transport>,
    policy: Arc<dyn ReconnectPolicy>,
    handlers: SyncRwLock<Vec<Arc<dyn FrameHandler>>>,
    state: watch::Sender<ChannelState>,
    outbox: Mutex<Outbox>,
    reconnect: SyncMutex<ReconnectState>,
    shutdown: watch::Sender<bool>,
    metrics: SharedMetrics,
}

/// Owns one persistent push channel and its reconnect loop.
///
/// Frames are parsed on a driver task and handed to every registered
/// [`FrameHandler`] in arrival order. Outbound frames sent while the channel
/// is not open wait in a bounded queue and are flushed, oldest first, on the
/// next successful open.
pub struct ChannelConnection {
    inner: Arc<ChannelInner>,
    driver: SyncMutex<Option<JoinHandle<()>>>,
}

impl ChannelConnection {
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        policy: Arc<dyn ReconnectPolicy>,
        pending_capacity: usize,
        metrics: SharedMetrics,
    ) -> Self {
        let (state, _) = watch::channel(ChannelState::Idle);
        let (shutdown, _) = watch::channel(false);
        ChannelConnection {
            inner: Arc::new(ChannelInner {
                name: name.into(),
                transport,
                policy,
                handlers: SyncRwLock::new(Vec::new()),
                state,
                outbox: Mutex::new(Outbox {
                    link: None,
                    pending: VecDeque::new(),
                    capacity: pending_capacity,
                    closed: false,
                }),
                reconnect: SyncMutex::new(ReconnectState::default()),
                shutdown,
                metrics,
            }),
            driver: SyncMutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Register a frame handler. Handlers added after `open()` only see
    /// frames that arrive after registration.
    pub fn on_message(&self, handler: Arc<dyn FrameHandler>) {
        self.inner.handlers.write().push(handler);
    }

    /// Observe state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.inner.state.subscribe()
    }

    pub fn state(&self) -> ChannelState {
        *self.inner.state.borrow()
    }

    pub fn reconnect_state(&self) -> ReconnectState {
        self.inner.reconnect.lock().clone()
    }

    /// Frames waiting for the next open.
    pub async fn pending_len(&self) -> usize {
        self.inner.outbox.lock().await.pending.len()
    }

    /// Start the connect/reconnect loop.
    ///
    /// A no-op while the loop is already running. Restarts it after `Lost`.
    pub fn open(&self) -> Result<(), SyncError> {
        let mut driver = self.driver.lock();
        match self.state() {
            ChannelState::Closed => return Err(SyncError::ChannelClosed(self.inner.name.clone())),
            ChannelState::Idle | ChannelState::Lost => {}
            _ => return Ok(()),
        }
        // A loop that reported Lost has already returned.
        if let Some(previous) = driver.take() {
            previous.abort();
        }

        self.inner.set_state(ChannelState::Connecting);
        let inner = Arc::clone(&self.inner);
        let shutdown = self.inner.shutdown.subscribe();
        *driver = Some(tokio::spawn(drive(inner, shutdown)));
        Ok(())
    }

    /// Send a frame, queueing it while the channel is not open.
    pub async fn send(&self, frame: &Frame) -> Result<SendStatus, SyncError> {
        let text = frame.to_json()?;
        let mut outbox = self.inner.outbox.lock().await;
        if outbox.closed {
            return Err(SyncError::ChannelClosed(self.inner.name.clone()));
        }

        let text = match outbox.link.clone() {
            Some(link) => match link.send(text).await {
                Ok(()) => {
                    self.inner.metrics.record_sent();
                    trace!(channel = %self.inner.name, kind = %frame.kind, "frame sent");
                    return Ok(SendStatus::Sent);
                }
                Err(mpsc::error::SendError(text)) => {
                    // The link died under us; the driver will notice shortly.
                    outbox.link = None;
                    text
                }
            },
            None => text,
        };

        let dropped = outbox.enqueue(text);
        self.inner.metrics.record_queued(dropped);
        if dropped > 0 {
            debug!(channel = %self.inner.name, dropped, "pending queue full, dropped oldest");
            Ok(SendStatus::QueuedDroppedOldest)
        } else {
            Ok(SendStatus::Queued)
        }
    }

    /// Send only if the channel is open right now; never queues.
    /// Returns whether the frame went out.
    pub async fn send_if_open(&self, frame: &Frame) -> Result<bool, SyncError> {
        let text = frame.to_json()?;
        let outbox = self.inner.outbox.lock().await;
        if outbox.closed {
            return Err(SyncError::ChannelClosed(self.inner.name.clone()));
        }
        let Some(link) = outbox.link.as_ref() else {
            return Ok(false);
        };
        if link.send(text).await.is_err() {
            return Ok(false);
        }
        self.inner.metrics.record_sent();
        Ok(true)
    }

    /// Close the channel and cancel any pending reconnect. Idempotent.
    pub async fn close(&self) {
        {
            let mut outbox = self.inner.outbox.lock().await;
            if outbox.closed {
                return;
            }
            outbox.closed = true;
            outbox.link = None;
            outbox.pending.clear();
        }

        self.inner.shutdown.send_replace(true);
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }

        {
            let mut reconnect = self.inner.reconnect.lock();
            reconnect.retry_pending = false;
            reconnect.next_delay = None;
        }
        self.inner.set_state(ChannelState::Closed);
        info!(channel = %self.inner.name, "channel closed");
    }

    /// Wait until the channel reaches `target`.
    pub async fn wait_for_state(&self, target: ChannelState) -> Result<(), SyncError> {
        let mut rx = self.subscribe_state();
        rx.wait_for(|s| *s == target)
            .await
            .map(|_| ())
            .map_err(|_| SyncError::ChannelClosed(self.inner.name.clone()))
    }
}

impl Drop for ChannelConnection {
    fn drop(&mut self) {
        self.inner.shutdown.send_replace(true);
        if let Some(handle) = self.driver.get_mut().take() {
            handle.abort();
        }
    }
}

impl ChannelInner {
    fn set_state(&self, next: ChannelState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(channel = %self.name, from = %prev, to = %next, "channel state");
        }
    }

    /// Install a fresh link, flush the pending queue, then mark Open.
    ///
    /// The outbox lock is held throughout so no concurrent `send()` can
    /// overtake a flushed frame. Returns `false`, installing nothing, once
    /// the channel has been closed.
    async fn attach(&self, outbound: mpsc::Sender<String>) -> bool {
        let mut outbox = self.outbox.lock().await;
        if outbox.closed {
            return false;
        }
        while let Some(text) = outbox.pending.pop_front() {
            if let Err(mpsc::error::SendError(text)) = outbound.send(text).await {
                outbox.pending.push_front(text);
                break;
            }
            self.metrics.record_sent();
        }
        outbox.link = Some(outbound);
        self.set_state(ChannelState::Open);
        true
    }

    async fn detach(&self) {
        self.outbox.lock().await.link = None;
    }

    async fn dispatch(&self, frame: Frame) {
        let handlers: Vec<_> = self.handlers.read().iter().cloned().collect();
        for handler in handlers {
            handler.on_frame(&self.name, &frame).await;
        }
    }

    /// Read inbound events until the link goes away. `None` means shutdown.
    async fn pump(
        &self,
        link: &mut TransportLink,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<DisconnectCause> {
        loop {
            let event = tokio::select! {
                event = link.inbound.recv() => event,
                _ = shutdown.changed() => return None,
            };

            match event {
                Some(TransportEvent::Message(text)) => {
                    self.metrics.record_received();
                    match Frame::parse(&text) {
                        Ok(frame) => self.dispatch(frame).await,
                        Err(e) => {
                            self.metrics.record_malformed();
                            warn!(channel = %self.name, error = %e, "dropping malformed frame");
                        }
                    }
                }
                Some(TransportEvent::Closed { reason }) => {
                    return Some(DisconnectCause::Closed { reason })
                }
                Some(TransportEvent::Error(e)) => return Some(DisconnectCause::Error(e)),
                None => return Some(DisconnectCause::Closed { reason: None }),
            }
        }
    }
}

async fn drive(inner: Arc<ChannelInner>, mut shutdown: watch::Receiver<bool>) {
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        inner.set_state(ChannelState::Connecting);

        let connected = tokio::select! {
            res = inner.transport.connect(&inner.name) => res,
            _ = shutdown.changed() => return,
        };

        let cause = match connected {
            Ok(mut link) => {
                attempt = 0;
                {
                    let mut reconnect = inner.reconnect.lock();
                    reconnect.attempt_count = 0;
                    reconnect.retry_pending = false;
                    reconnect.next_delay = None;
                }
                inner.metrics.record_opened();
                if !inner.attach(link.outbound.clone()).await {
                    debug!(channel = %inner.name, "connected after close, dropping link");
                    return;
                }
                info!(channel = %inner.name, transport = inner.transport.name(), "channel open");

                let cause = match inner.pump(&mut link, &mut shutdown).await {
                    Some(cause) => cause,
                    None => return,
                };
                inner.detach().await;
                inner.metrics.record_disconnect();
                cause
            }
            Err(e) => DisconnectCause::ConnectFailed(e.to_string()),
        };

        attempt = attempt.saturating_add(1);
        let reason = cause.describe();

        let Some(delay) = inner.policy.next_delay(attempt, &cause) else {
            {
                let mut reconnect = inner.reconnect.lock();
                reconnect.attempt_count = attempt;
                reconnect.last_error = Some(reason.clone());
                reconnect.retry_pending = false;
                reconnect.next_delay = None;
            }
            inner.metrics.record_lost();
            inner.set_state(ChannelState::Lost);
            warn!(channel = %inner.name, attempts = attempt, reason = %reason, "giving up on channel");
            return;
        };

        {
            let mut reconnect = inner.reconnect.lock();
            reconnect.attempt_count = attempt;
            reconnect.last_error = Some(reason.clone());
            reconnect.retry_pending = true;
            reconnect.next_delay = Some(delay);
        }
        inner.set_state(ChannelState::WaitingToRetry);
        warn!(
            channel = %inner.name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            reason = %reason,
            "channel lost, scheduling reconnect"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => return,
        }

        inner.reconnect.lock().retry_pending = false;
        inner.metrics.record_reconnect_attempt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use dashsync_core::create_metrics;
    use serde_json::json;

    use crate::reconnect::FixedDelay;
    use crate::transport::MemoryTransport;

    #[derive(Default)]
    struct Collect {
        frames: SyncMutex<Vec<Frame>>,
    }

    #[async_trait]
    impl FrameHandler for Collect {
        async fn on_frame(&self, _channel: &str, frame: &Frame) {
            self.frames.lock().push(frame.clone());
        }
    }

    fn channel(
        transport: &MemoryTransport,
        policy: Arc<dyn ReconnectPolicy>,
        pending: usize,
    ) -> ChannelConnection {
        ChannelConnection::new(
            "analytics",
            Arc::new(transport.clone()),
            policy,
            pending,
            create_metrics(),
        )
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_delivers_frames_in_order() {
        let transport = MemoryTransport::new();
        let conn = channel(&transport, Arc::new(FixedDelay::default()), 10);
        let collect = Arc::new(Collect::default());
        conn.on_message(collect.clone());

        conn.open().unwrap();
        conn.wait_for_state(ChannelState::Open).await.unwrap();

        transport.push_frame("analytics", &Frame::new("stats_update", json!({"a": 1})));
        transport.push_frame("analytics", &Frame::new("stats_update", json!({"a": 2})));
        settle().await;

        let frames = collect.frames.lock().clone();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].field("a"), Some(&json!(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_keeps_channel_open() {
        let transport = MemoryTransport::new();
        let metrics = create_metrics();
        let conn = ChannelConnection::new(
            "analytics",
            Arc::new(transport.clone()),
            Arc::new(FixedDelay::default()),
            10,
            metrics.clone(),
        );
        let collect = Arc::new(Collect::default());
        conn.on_message(collect.clone());
        conn.open().unwrap();
        conn.wait_for_state(ChannelState::Open).await.unwrap();

        assert!(transport.push("analytics", "{bad json"));
        settle().await;

        assert_eq!(conn.state(), ChannelState::Open);
        assert!(collect.frames.lock().is_empty());
        assert_eq!(transport.connect_count("analytics"), 1);
        assert_eq!(conn.reconnect_state().attempt_count, 0);
        assert_eq!(metrics.snapshot().frames_malformed, 1);

        // Still usable afterwards.
        transport.push_frame("analytics", &Frame::control("pong"));
        settle().await;
        assert_eq!(collect.frames.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_constant_delay_across_disconnect_causes() {
        let transport = MemoryTransport::new();
        let conn = channel(&transport, Arc::new(FixedDelay::default()), 10);
        conn.open().unwrap();
        conn.wait_for_state(ChannelState::Open).await.unwrap();

        for round in 0..3 {
            let lost_at = tokio::time::Instant::now();
            if round % 2 == 0 {
                transport.disconnect("analytics", Some("server restart"));
            } else {
                transport.fail("analytics", "connection reset");
            }
            conn.wait_for_state(ChannelState::WaitingToRetry).await.unwrap();
            let pending = conn.reconnect_state();
            assert!(pending.retry_pending);
            assert_eq!(pending.next_delay, Some(Duration::from_secs(3)));

            conn.wait_for_state(ChannelState::Open).await.unwrap();
            let waited = lost_at.elapsed();
            assert!(
                waited >= Duration::from_secs(3) && waited < Duration::from_millis(3010),
                "round {}: {:?}",
                round,
                waited
            );
            assert_eq!(conn.reconnect_state().attempt_count, 0);
        }
        assert_eq!(transport.connect_count("analytics"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_retries_after_delay() {
        let transport = MemoryTransport::new();
        transport.refuse_next("analytics", 2);
        let conn = channel(&transport, Arc::new(FixedDelay::new(Duration::from_secs(1))), 10);
        let start = tokio::time::Instant::now();
        conn.open().unwrap();
        conn.wait_for_state(ChannelState::Open).await.unwrap();

        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(2) && waited < Duration::from_millis(2010));
        assert_eq!(transport.connect_count("analytics"), 3);
        let state = conn.reconnect_state();
        assert_eq!(state.attempt_count, 0);
        assert!(state.last_error.unwrap().contains("connect failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_pending_timer_never_reconnects() {
        let transport = MemoryTransport::new();
        let conn = channel(&transport, Arc::new(FixedDelay::default()), 10);
        conn.open().unwrap();
        conn.wait_for_state(ChannelState::Open).await.unwrap();

        transport.disconnect("analytics", None);
        conn.wait_for_state(ChannelState::WaitingToRetry).await.unwrap();
        conn.close().await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(conn.state(), ChannelState::Closed);
        assert_eq!(transport.connect_count("analytics"), 1);
        assert!(!conn.reconnect_state().retry_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_attempts_ends_in_lost() {
        let transport = MemoryTransport::new();
        transport.refuse_next("analytics", u32::MAX);
        let policy = FixedDelay::new(Duration::from_millis(500)).with_max_attempts(3);
        let conn = channel(&transport, Arc::new(policy), 10);
        conn.open().unwrap();
        conn.wait_for_state(ChannelState::Lost).await.unwrap();

        // Initial connect plus three retries.
        assert_eq!(transport.connect_count("analytics"), 4);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.connect_count("analytics"), 4);

        let state = conn.reconnect_state();
        assert_eq!(state.attempt_count, 4);
        assert!(!state.retry_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_after_lost_restarts() {
        let transport = MemoryTransport::new();
        transport.refuse_next("analytics", 1);
        let policy = FixedDelay::new(Duration::from_millis(10)).with_max_attempts(0);
        let conn = channel(&transport, Arc::new(policy), 10);
        conn.open().unwrap();
        conn.wait_for_state(ChannelState::Lost).await.unwrap();

        conn.open().unwrap();
        conn.wait_for_state(ChannelState::Open).await.unwrap();
        assert_eq!(transport.connect_count("analytics"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_queue_drops_oldest_and_flushes_in_order() {
        let transport = MemoryTransport::new();
        transport.refuse_next("analytics", 1);
        let conn = channel(&transport, Arc::new(FixedDelay::new(Duration::from_secs(1))), 3);
        conn.open().unwrap();
        conn.wait_for_state(ChannelState::WaitingToRetry).await.unwrap();

        let mut statuses = Vec::new();
        for i in 1..=5 {
            statuses.push(conn.send(&Frame::new("ping", json!({"seq": i}))).await.unwrap());
        }
        assert_eq!(statuses[0], SendStatus::Queued);
        assert_eq!(statuses[4], SendStatus::QueuedDroppedOldest);
        assert_eq!(conn.pending_len().await, 3);

        conn.wait_for_state(ChannelState::Open).await.unwrap();
        let status = conn.send(&Frame::new("ping", json!({"seq": 6}))).await.unwrap();
        assert_eq!(status, SendStatus::Sent);

        let seqs: Vec<i64> = transport
            .sent("analytics")
            .iter()
            .map(|text| Frame::parse(text).unwrap().field("seq").unwrap().as_i64().unwrap())
            .collect();
        assert_eq!(seqs, vec![3, 4, 5, 6]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_after_close_fails() {
        let transport = MemoryTransport::new();
        let conn = channel(&transport, Arc::new(FixedDelay::default()), 3);
        conn.open().unwrap();
        conn.wait_for_state(ChannelState::Open).await.unwrap();
        conn.close().await;
        conn.close().await;

        let err = conn.send(&Frame::control("ping")).await.unwrap_err();
        assert!(matches!(err, SyncError::ChannelClosed(name) if name == "analytics"));
        assert!(conn.send_if_open(&Frame::control("ping")).await.is_err());
        assert!(matches!(conn.open(), Err(SyncError::ChannelClosed(_))));
        assert!(!transport.is_connected("analytics"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_after_close_installs_nothing() {
        let transport = MemoryTransport::new();
        let conn = channel(&transport, Arc::new(FixedDelay::default()), 3);
        conn.close().await;

        let (tx, mut rx) = mpsc::channel(4);
        assert!(!conn.inner.attach(tx).await);

        assert_eq!(conn.state(), ChannelState::Closed);
        assert!(conn.inner.outbox.lock().await.link.is_none());
        assert!(rx.try_recv().is_err());
        assert!(conn.send(&Frame::control("ping")).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_if_open_never_queues() {
        let transport = MemoryTransport::new();
        let conn = channel(&transport, Arc::new(FixedDelay::default()), 3);
        assert!(!conn.send_if_open(&Frame::refresh_stats()).await.unwrap());
        assert_eq!(conn.pending_len().await, 0);

        conn.open().unwrap();
        conn.wait_for_state(ChannelState::Open).await.unwrap();
        assert!(conn.send_if_open(&Frame::refresh_stats()).await.unwrap());
        assert_eq!(transport.sent("analytics"), vec![r#"{"type":"refresh_stats"}"#.to_string()]);
    }
}
