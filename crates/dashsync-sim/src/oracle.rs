use std::collections::HashMap;

use serde_json::Value;

use dashsync_config::{DashboardConfig, LogKind, SnapshotTarget};
use dashsync_core::{EventLogEntry, Frame, StateMerger};
use dashsync_net::{SnapshotEndpoint, SnapshotReport};

/// Reference model: a second merger fed exactly the inputs the coordinator
/// should have seen, applied sequentially.
pub struct Oracle {
    merger: StateMerger,
    targets: HashMap<String, SnapshotTarget>,
}

impl Oracle {
    pub fn new(config: &DashboardConfig) -> Self {
        let config = config.effective();
        let targets = config
            .snapshot
            .endpoints
            .iter()
            .map(SnapshotEndpoint::from)
            .map(|e| (e.name, e.target))
            .collect();
        Oracle {
            merger: StateMerger::from_config(&config),
            targets,
        }
    }

    /// Record a frame the server managed to deliver.
    pub fn apply(&mut self, frame: &Frame) {
        self.merger.apply(frame);
    }

    /// Replay one snapshot run. `data` maps endpoint name to the response
    /// the source was primed with.
    pub fn apply_snapshot(&mut self, report: &SnapshotReport, data: &HashMap<String, Value>) {
        for name in &report.loaded {
            if let (Some(target), Some(value)) = (self.targets.get(name), data.get(name)) {
                let _ = self.merger.apply_snapshot(name, target, value.clone());
            }
        }
        for (name, reason) in &report.failed {
            self.merger.record_snapshot_failure(name, reason);
        }
    }

    pub fn merger(&self) -> &StateMerger {
        &self.merger
    }
}

/// Comparable identity of a log entry. Synthetic failures carry random ids,
/// so they compare by message.
pub fn entry_key(entry: &EventLogEntry) -> String {
    if entry.category == "system" {
        format!("system:{}", entry.message)
    } else {
        entry.id.clone()
    }
}

pub fn log_keys(merger: &StateMerger, kind: LogKind) -> Vec<String> {
    merger.log(kind).iter().map(entry_key).collect()
}
