mod error;
mod event_log;
mod frame;
mod merger;
mod metrics;
mod traits;
mod view_model;

pub use error::SyncError;
pub use event_log::{BoundedEventLog, EventLogEntry, Severity};
pub use frame::{Frame, REFRESH_STATS};
pub use merger::{derive_entry, Dispatch, MergeOutcome, MergeRules, StateMerger};
pub use metrics::{create_metrics, MetricsSnapshot, SharedMetrics, SyncMetrics};
pub use traits::{FrameHandler, SnapshotSource, Transport, TransportEvent, TransportLink};
pub use view_model::ViewModel;
