use dashsync_config::LogKind;
use dashsync_core::{EventLogEntry, Frame};
use dashsync_net::{ChannelState, DashboardSyncCoordinator, MemoryTransport};

use crate::oracle::{entry_key, log_keys, Oracle};
use crate::ops::CHANNELS;

/// Frame type the simulation uses for sequenced client sends.
pub const CLIENT_PING: &str = "client_ping";

/// A violation detected during simulation.
#[derive(Debug, Clone)]
pub struct Violation {
    pub step: usize,
    pub invariant: String,
    pub details: String,
}

impl Violation {
    fn new(step: usize, invariant: &str, details: String) -> Self {
        Violation {
            step,
            invariant: invariant.to_string(),
            details,
        }
    }
}

/// Sequence numbers of client frames the server received, in arrival order.
pub fn delivered_seqs(transport: &MemoryTransport, channel: &str) -> Vec<u64> {
    transport
        .sent(channel)
        .iter()
        .filter_map(|text| Frame::parse(text).ok())
        .filter(|frame| frame.kind == CLIENT_PING)
        .filter_map(|frame| frame.field("seq").and_then(|v| v.as_u64()))
        .collect()
}

/// Run per-step invariant checks.
///
/// `sends_accepted` is the number of client sends that returned `Ok`.
pub async fn check_step_invariants(
    step: usize,
    coordinator: &DashboardSyncCoordinator,
    transport: &MemoryTransport,
    oracle: &Oracle,
    sends_accepted: u64,
) -> Vec<Violation> {
    let mut violations = Vec::new();
    let expected = oracle.merger();

    // 1. View model matches the sequential model.
    let view = coordinator.view_model().await;
    if &view != expected.view() {
        violations.push(Violation::new(
            step,
            "view-model-match",
            format!("actual {} vs expected {}", view.to_json(), expected.view().to_json()),
        ));
    }

    // 2. Counter floor.
    let active = view.counter("active_users");
    if active < 0 {
        violations.push(Violation::new(
            step,
            "counter-floor",
            format!("active_users = {}", active),
        ));
    }

    // 3. Logs are bounded and match the model, newest first.
    for (kind, actual) in [
        (LogKind::Activity, coordinator.activity().await),
        (LogKind::Events, coordinator.events().await),
    ] {
        let capacity = expected.log(kind).capacity();
        if actual.len() > capacity {
            violations.push(Violation::new(
                step,
                "log-bounded",
                format!("{} log holds {} > {}", kind, actual.len(), capacity),
            ));
        }
        let keys: Vec<String> = actual.iter().map(entry_key).collect();
        let want = log_keys(expected, kind);
        if keys != want {
            violations.push(Violation::new(
                step,
                "log-match",
                format!("{} log {:?} vs expected {:?}", kind, keys, want),
            ));
        }
        check_system_entries(step, &actual, &mut violations);
    }

    // 4. Channel state agrees with the link, and is never open while retrying.
    for channel in CHANNELS {
        let state = match coordinator.channel_state(channel) {
            Ok(state) => state,
            Err(e) => {
                violations.push(Violation::new(step, "channel-known", e.to_string()));
                continue;
            }
        };
        let connected = transport.is_connected(channel);
        let retry_pending = coordinator
            .reconnect_state(channel)
            .map(|r| r.retry_pending)
            .unwrap_or(false);

        match state {
            ChannelState::Open if !connected || retry_pending => {
                violations.push(Violation::new(
                    step,
                    "open-exclusive",
                    format!(
                        "'{}' is open with connected={} retry_pending={}",
                        channel, connected, retry_pending
                    ),
                ));
            }
            ChannelState::WaitingToRetry if connected => {
                violations.push(Violation::new(
                    step,
                    "retry-disconnected",
                    format!("'{}' waits to retry while still connected", channel),
                ));
            }
            ChannelState::Lost | ChannelState::Closed | ChannelState::Idle => {
                violations.push(Violation::new(
                    step,
                    "channel-alive",
                    format!("'{}' is {} during the run", channel, state),
                ));
            }
            _ => {}
        }

        // 5. Client frames arrive in send order.
        let seqs = delivered_seqs(transport, channel);
        if seqs.windows(2).any(|w| w[0] >= w[1]) {
            violations.push(Violation::new(
                step,
                "send-order",
                format!("'{}' delivered {:?}", channel, seqs),
            ));
        }
    }

    // 6. Every accepted send is delivered, pending, or counted as dropped.
    let mut accounted = coordinator.metrics().frames_dropped;
    for channel in CHANNELS {
        accounted += delivered_seqs(transport, channel).len() as u64;
        if let Ok(conn) = coordinator.channel(channel) {
            accounted += conn.pending_len().await as u64;
        }
    }
    if accounted != sends_accepted {
        violations.push(Violation::new(
            step,
            "send-conservation",
            format!("accounted {} of {} accepted sends", accounted, sends_accepted),
        ));
    }

    violations
}

fn check_system_entries(step: usize, entries: &[EventLogEntry], violations: &mut Vec<Violation>) {
    for entry in entries.iter().filter(|e| e.category == "system") {
        if entry.severity != dashsync_core::Severity::Error {
            violations.push(Violation::new(
                step,
                "system-entry-severity",
                format!("system entry '{}' is {:?}", entry.message, entry.severity),
            ));
        }
    }
}

/// Checks after `stop()`: everything closed, nothing reconnects.
pub fn check_stopped(
    step: usize,
    coordinator: &DashboardSyncCoordinator,
    transport: &MemoryTransport,
    connects_at_stop: &[u32],
) -> Vec<Violation> {
    let mut violations = Vec::new();

    for (channel, state) in coordinator.channel_states() {
        if state != ChannelState::Closed {
            violations.push(Violation::new(
                step,
                "stopped-closed",
                format!("'{}' is {} after stop", channel, state),
            ));
        }
    }

    for (channel, before) in CHANNELS.iter().zip(connects_at_stop) {
        let after = transport.connect_count(channel);
        if after != *before {
            violations.push(Violation::new(
                step,
                "stopped-no-reconnect",
                format!("'{}' connected {} times after stop", channel, after - before),
            ));
        }
    }

    if !transport.connected_channels().is_empty() {
        violations.push(Violation::new(
            step,
            "stopped-no-links",
            format!("still connected: {:?}", transport.connected_channels()),
        ));
    }

    violations
}
