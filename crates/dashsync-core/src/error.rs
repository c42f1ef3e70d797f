/// Errors raised by the synchronization core.
///
/// None of these are fatal to the host process. Transport failures feed the
/// reconnect policy, parse failures drop one frame, and snapshot failures
/// degrade part of the view model.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SyncError {
    /// The push channel dropped or could not be established.
    #[error("Transport error on channel '{channel}': {reason}")]
    Transport { channel: String, reason: String },

    /// An inbound frame could not be decoded.
    #[error("Malformed frame: {0}")]
    Parse(String),

    /// One snapshot sub-request failed.
    #[error("Snapshot endpoint '{endpoint}' failed: {reason}")]
    SnapshotFetch { endpoint: String, reason: String },

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {millis}ms")]
    Timeout { operation: String, millis: u64 },

    /// The channel was closed by its owner.
    #[error("Channel '{0}' is closed")]
    ChannelClosed(String),

    /// No channel with this name is configured.
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    /// The coordinator has been stopped and cannot be reused.
    #[error("Coordinator is stopped; construct a new one to restart")]
    CoordinatorStopped,

    /// `start()` was called twice.
    #[error("Coordinator already started")]
    AlreadyStarted,

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Convenience constructor for transport failures.
    pub fn transport(channel: impl Into<String>, reason: impl ToString) -> Self {
        SyncError::Transport {
            channel: channel.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true if this error is transient and the operation may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Transport { .. } => true,
            SyncError::Timeout { .. } => true,
            SyncError::SnapshotFetch { .. } => true,
            SyncError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Parse(e.to_string())
    }
}

impl From<dashsync_config::ConfigError> for SyncError {
    fn from(e: dashsync_config::ConfigError) -> Self {
        SyncError::Config(e.to_string())
    }
}
