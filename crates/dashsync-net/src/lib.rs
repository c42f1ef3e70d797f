//! Push channels, snapshot fan-out, and the coordinator that ties them to
//! a [`dashsync_core::StateMerger`].

mod channel;
mod coordinator;
mod reconnect;
mod snapshot;
pub mod transport;

pub use channel::{ChannelConnection, ChannelState, SendStatus};
pub use coordinator::{DashboardSyncCoordinator, RefreshReport};
pub use reconnect::{
    compute_backoff, policy_from_config, Backoff, DisconnectCause, FixedDelay, ReconnectPolicy,
    ReconnectState,
};
pub use snapshot::{
    HttpSnapshotSource, MemorySnapshotSource, SnapshotEndpoint, SnapshotLoader, SnapshotReport,
};
pub use transport::{transport_from_config, MemoryTransport, TcpTransport};
