use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::SyncError;
use crate::frame::Frame;

/// Something that happened on an open transport link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One raw inbound text frame, not yet parsed.
    Message(String),
    /// The peer closed the link.
    Closed { reason: Option<String> },
    /// The link failed.
    Error(String),
}

/// Both halves of an established link.
///
/// Dropping `outbound` asks the transport to close its side. A link whose
/// `inbound` stream ends without a `Closed` event is treated as closed.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

impl TransportLink {
    pub fn new(outbound: mpsc::Sender<String>, inbound: mpsc::Receiver<TransportEvent>) -> Self {
        TransportLink { outbound, inbound }
    }
}

/// Push transport capability.
///
/// Implementations establish one link per logical channel. Retry timing is
/// not their concern: a failed `connect` is reported once and the caller's
/// reconnect policy decides what happens next.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a link subscribed to `channel`.
    async fn connect(&self, channel: &str) -> Result<TransportLink, SyncError>;

    /// Human-readable transport name for logs.
    fn name(&self) -> &str;
}

/// Receives every well-formed frame of a channel, in arrival order.
#[async_trait]
pub trait FrameHandler: Send + Sync + 'static {
    async fn on_frame(&self, channel: &str, frame: &Frame);
}

/// Request/response source for snapshot sub-requests.
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    /// Fetch one endpoint and return the `data` of a successful response.
    ///
    /// Any unsuccessful outcome, including a `success: false` envelope, is an
    /// error.
    async fn fetch(&self, endpoint: &str, path: &str) -> Result<Value, SyncError>;
}
