use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use dashsync_core::{Frame, SyncError, Transport, TransportEvent, TransportLink};

const LINK_BUFFER: usize = 1024;

/// In-process transport. Clones share state, so a test keeps one clone as
/// the "server side" and hands another to the channel.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

#[derive(Default)]
struct Slot {
    connects: u32,
    refuse: u32,
    live: Option<LiveLink>,
    sent: Vec<String>,
}

struct LiveLink {
    events: mpsc::Sender<TransportEvent>,
    outbound: mpsc::Receiver<String>,
}

impl Slot {
    fn drain_outbound(&mut self) {
        if let Some(live) = self.live.as_mut() {
            while let Ok(text) = live.outbound.try_recv() {
                self.sent.push(text);
            }
        }
    }

    /// Drop the live link, keeping whatever it already sent.
    fn take_live(&mut self) -> Option<LiveLink> {
        self.drain_outbound();
        self.live.take()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a raw text frame. Returns false when nothing is connected.
    pub fn push(&self, channel: &str, text: impl Into<String>) -> bool {
        let slots = self.slots.lock();
        match slots.get(channel).and_then(|s| s.live.as_ref()) {
            Some(live) => live
                .events
                .try_send(TransportEvent::Message(text.into()))
                .is_ok(),
            None => false,
        }
    }

    pub fn push_frame(&self, channel: &str, frame: &Frame) -> bool {
        match frame.to_json() {
            Ok(text) => self.push(channel, text),
            Err(_) => false,
        }
    }

    /// Close the live link from the server side.
    pub fn disconnect(&self, channel: &str, reason: Option<&str>) {
        self.end(
            channel,
            TransportEvent::Closed {
                reason: reason.map(str::to_string),
            },
        );
    }

    /// Fail the live link.
    pub fn fail(&self, channel: &str, error: &str) {
        self.end(channel, TransportEvent::Error(error.to_string()));
    }

    fn end(&self, channel: &str, event: TransportEvent) {
        let mut slots = self.slots.lock();
        if let Some(live) = slots.get_mut(channel).and_then(Slot::take_live) {
            let _ = live.events.try_send(event);
        }
    }

    /// Refuse the next `count` connect attempts for `channel`.
    pub fn refuse_next(&self, channel: &str, count: u32) {
        self.slots
            .lock()
            .entry(channel.to_string())
            .or_default()
            .refuse = count;
    }

    /// Number of connect attempts seen, refused ones included.
    pub fn connect_count(&self, channel: &str) -> u32 {
        self.slots.lock().get(channel).map_or(0, |s| s.connects)
    }

    /// Everything the client wrote on this channel, across links, in order.
    pub fn sent(&self, channel: &str) -> Vec<String> {
        let mut slots = self.slots.lock();
        match slots.get_mut(channel) {
            Some(slot) => {
                slot.drain_outbound();
                slot.sent.clone()
            }
            None => Vec::new(),
        }
    }

    /// Whether a link is up and the client still holds its end.
    pub fn is_connected(&self, channel: &str) -> bool {
        self.slots
            .lock()
            .get(channel)
            .and_then(|s| s.live.as_ref())
            .is_some_and(|live| !live.events.is_closed())
    }

    /// Channels with a live link.
    pub fn connected_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .slots
            .lock()
            .iter()
            .filter(|(_, s)| s.live.as_ref().is_some_and(|l| !l.events.is_closed()))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, channel: &str) -> Result<TransportLink, SyncError> {
        let mut slots = self.slots.lock();
        let slot = slots.entry(channel.to_string()).or_default();
        slot.connects += 1;

        if slot.refuse > 0 {
            slot.refuse -= 1;
            return Err(SyncError::transport(channel, "connection refused"));
        }

        slot.take_live();
        let (events_tx, events_rx) = mpsc::channel(LINK_BUFFER);
        let (outbound_tx, outbound_rx) = mpsc::channel(LINK_BUFFER);
        slot.live = Some(LiveLink {
            events: events_tx,
            outbound: outbound_rx,
        });
        Ok(TransportLink::new(outbound_tx, events_rx))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
