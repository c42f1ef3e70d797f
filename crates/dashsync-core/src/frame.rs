use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;

/// Type of the control frame asking the server to push fresh stats.
pub const REFRESH_STATS: &str = "refresh_stats";

/// One message unit on a persistent channel.
///
/// `kind` is the dispatch discriminator (`type` on the wire). `payload` is
/// opaque to the transport layer; a missing payload decodes as `null`.
/// `timestamp` is kept as sent: an RFC 3339 string or epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
}

impl Frame {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Frame {
            kind: kind.into(),
            payload,
            timestamp: None,
        }
    }

    /// A frame with no payload.
    pub fn control(kind: impl Into<String>) -> Self {
        Frame::new(kind, Value::Null)
    }

    /// The `{type: "refresh_stats"}` control frame.
    pub fn refresh_stats() -> Self {
        Frame::control(REFRESH_STATS)
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<Value>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Decode one wire frame.
    pub fn parse(text: &str) -> Result<Self, SyncError> {
        let frame: Frame = serde_json::from_str(text.trim())?;
        if frame.kind.is_empty() {
            return Err(SyncError::Parse("frame type is empty".to_string()));
        }
        Ok(frame)
    }

    /// Encode as a single line of JSON.
    pub fn to_json(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Look up a top-level payload field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.as_object().and_then(|obj| obj.get(name))
    }
}
