//! Folds inbound frames and snapshot results into the view model and event logs.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::{debug, trace, warn};

use dashsync_config::{CounterRule, DashboardConfig, LogKind, MergeConfig, SnapshotTarget};

use crate::error::SyncError;
use crate::event_log::{BoundedEventLog, EventLogEntry, Severity};
use crate::frame::Frame;
use crate::view_model::ViewModel;

/// How a frame type is handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Shallow-merge the payload into the view model.
    Update,
    /// Derive an entry for one of the event logs.
    Log(LogKind),
    /// Signed adjustment of a numeric key.
    Counter(CounterRule),
    /// Not recognised; dropped without error.
    Unknown,
}

/// Frame-type dispatch table.
#[derive(Debug, Clone)]
pub struct MergeRules {
    update: HashSet<String>,
    activity: HashSet<String>,
    events: HashSet<String>,
    counters: HashMap<String, CounterRule>,
}

impl MergeRules {
    pub fn classify(&self, kind: &str) -> Dispatch {
        if self.update.contains(kind) {
            Dispatch::Update
        } else if self.activity.contains(kind) {
            Dispatch::Log(LogKind::Activity)
        } else if self.events.contains(kind) {
            Dispatch::Log(LogKind::Events)
        } else if let Some(rule) = self.counters.get(kind) {
            Dispatch::Counter(rule.clone())
        } else {
            Dispatch::Unknown
        }
    }
}

impl From<&MergeConfig> for MergeRules {
    fn from(config: &MergeConfig) -> Self {
        MergeRules {
            update: config.update_types.iter().cloned().collect(),
            activity: config.activity_types.iter().cloned().collect(),
            events: config.event_types.iter().cloned().collect(),
            counters: config
                .counters
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

impl Default for MergeRules {
    fn default() -> Self {
        MergeRules::from(&MergeConfig::default())
    }
}

/// Result of applying one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged { keys: Vec<String> },
    Logged { log: LogKind, id: String },
    Counter { key: String, value: i64 },
    Ignored,
}

/// Owns the view model and both event logs.
#[derive(Debug, Clone)]
pub struct StateMerger {
    rules: MergeRules,
    view: ViewModel,
    activity: BoundedEventLog,
    events: BoundedEventLog,
}

impl StateMerger {
    pub fn new(rules: MergeRules, activity_capacity: usize, event_capacity: usize) -> Self {
        StateMerger {
            rules,
            view: ViewModel::new(),
            activity: BoundedEventLog::new(activity_capacity),
            events: BoundedEventLog::new(event_capacity),
        }
    }

    pub fn from_config(config: &DashboardConfig) -> Self {
        StateMerger::new(
            MergeRules::from(&config.merge),
            config.buffers.activity_capacity,
            config.buffers.event_capacity,
        )
    }

    /// Apply one inbound frame. Arrival order is apply order; there is no
    /// versioning, so the last write to a key wins.
    pub fn apply(&mut self, frame: &Frame) -> MergeOutcome {
        match self.rules.classify(&frame.kind) {
            Dispatch::Update => match frame.payload.as_object() {
                Some(patch) => {
                    let keys = self.view.merge(patch);
                    trace!(kind = %frame.kind, keys = keys.len(), "merged update");
                    MergeOutcome::Merged { keys }
                }
                None => {
                    debug!(kind = %frame.kind, "update frame without object payload ignored");
                    MergeOutcome::Ignored
                }
            },
            Dispatch::Log(kind) => {
                let entry = derive_entry(&frame.kind, &frame.payload, frame.timestamp.as_ref());
                let id = entry.id.clone();
                self.log_mut(kind).append(entry);
                MergeOutcome::Logged { log: kind, id }
            }
            Dispatch::Counter(rule) => {
                let magnitude = frame
                    .field("delta")
                    .and_then(Value::as_i64)
                    .map(i64::abs)
                    .unwrap_or_else(|| rule.delta.abs());
                let delta = magnitude.saturating_mul(rule.delta.signum());
                let value = self.view.adjust_counter(&rule.key, delta);
                trace!(kind = %frame.kind, key = %rule.key, delta, value, "counter adjusted");
                MergeOutcome::Counter {
                    key: rule.key,
                    value,
                }
            }
            Dispatch::Unknown => {
                debug!(kind = %frame.kind, "ignoring unknown frame type");
                MergeOutcome::Ignored
            }
        }
    }

    /// Apply the `data` of one successful snapshot sub-request.
    ///
    /// The shape is checked before anything is written, so a mismatched
    /// response leaves the view model untouched. Returns the number of keys
    /// or entries written.
    pub fn apply_snapshot(
        &mut self,
        endpoint: &str,
        target: &SnapshotTarget,
        data: Value,
    ) -> Result<usize, SyncError> {
        match target {
            SnapshotTarget::Merge => match data {
                Value::Object(map) => Ok(self.view.merge(&map).len()),
                other => Err(shape_error(endpoint, "an object", &other)),
            },
            SnapshotTarget::Key(key) => {
                self.view.set(key.clone(), data);
                Ok(1)
            }
            SnapshotTarget::Log(kind) => match data {
                Value::Array(items) => {
                    let label = kind.to_string();
                    let count = items.len();
                    let log = self.log_mut(*kind);
                    // A snapshot is the full feed; it replaces what was there.
                    log.clear();
                    // Responses list newest first; append oldest first so the
                    // head of the array ends up at the head of the log.
                    for item in items.iter().rev() {
                        log.append(derive_entry(&label, item, None));
                    }
                    Ok(count)
                }
                other => Err(shape_error(endpoint, "an array", &other)),
            },
        }
    }

    /// Emit the synthetic entry for a failed snapshot sub-request.
    pub fn record_snapshot_failure(&mut self, endpoint: &str, reason: &str) {
        warn!(endpoint = %endpoint, reason = %reason, "snapshot sub-request failed");
        self.events.append(EventLogEntry::system_error(format!(
            "Failed to load {}: {}",
            endpoint, reason
        )));
    }

    /// Append an entry directly.
    pub fn push_entry(&mut self, kind: LogKind, entry: EventLogEntry) {
        self.log_mut(kind).append(entry);
    }

    pub fn view(&self) -> &ViewModel {
        &self.view
    }

    pub fn log(&self, kind: LogKind) -> &BoundedEventLog {
        match kind {
            LogKind::Activity => &self.activity,
            LogKind::Events => &self.events,
        }
    }

    fn log_mut(&mut self, kind: LogKind) -> &mut BoundedEventLog {
        match kind {
            LogKind::Activity => &mut self.activity,
            LogKind::Events => &mut self.events,
        }
    }

    pub fn rules(&self) -> &MergeRules {
        &self.rules
    }
}

fn shape_error(endpoint: &str, expected: &str, got: &Value) -> SyncError {
    let got = match got {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    };
    SyncError::SnapshotFetch {
        endpoint: endpoint.to_string(),
        reason: format!("expected {} in data, got {}", expected, got),
    }
}

/// Build an entry from an event payload.
pub fn derive_entry(kind: &str, payload: &Value, frame_timestamp: Option<&Value>) -> EventLogEntry {
    let field = |name: &str| payload_field(payload, name);
    let text = |name: &str| payload_text(payload, name);

    let id = match field("id") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => uuid::Uuid::new_v4().to_string(),
    };

    let timestamp = frame_timestamp
        .and_then(parse_timestamp)
        .or_else(|| field("timestamp").and_then(parse_timestamp))
        .or_else(|| field("created_at").and_then(parse_timestamp))
        .unwrap_or_else(Utc::now);

    let category = text("category").unwrap_or_else(|| kind.to_string());

    let severity = text("severity")
        .or_else(|| text("level"))
        .map(|s| Severity::from_label(&s))
        .unwrap_or_default();

    let message = text("message")
        .or_else(|| text("title"))
        .or_else(|| text("description"))
        .unwrap_or_else(|| match payload {
            Value::String(s) => s.clone(),
            Value::Null => kind.to_string(),
            other => other.to_string(),
        });

    EventLogEntry {
        id,
        timestamp,
        category,
        severity,
        message,
    }
}

fn payload_field<'a>(payload: &'a Value, name: &str) -> Option<&'a Value> {
    payload.as_object().and_then(|o| o.get(name))
}

fn payload_text(payload: &Value, name: &str) -> Option<String> {
    payload_field(payload, name)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s),
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn merger() -> StateMerger {
        StateMerger::new(MergeRules::default(), 20, 50)
    }

    #[test]
    fn test_stats_update_is_idempotent() {
        let mut m = merger();
        let frame = Frame::new("stats_update", json!({"total_users": 40, "revenue": 12.5}));
        m.apply(&frame);
        let once = m.view().clone();
        m.apply(&frame);
        assert_eq!(m.view(), &once);
    }

    #[test]
    fn test_last_write_wins() {
        let mut m = merger();
        m.apply(&Frame::new("stats_update", json!({"total_users": 1})));
        m.apply(&Frame::new("analytics_update", json!({"total_users": 2})));
        assert_eq!(m.view().get("total_users"), Some(&json!(2)));
    }

    #[test]
    fn test_update_with_non_object_payload_ignored() {
        let mut m = merger();
        assert_eq!(
            m.apply(&Frame::new("stats_update", json!([1, 2]))),
            MergeOutcome::Ignored
        );
        assert!(m.view().is_empty());
    }

    #[test]
    fn test_three_leaves_before_join() {
        let mut m = merger();
        for _ in 0..3 {
            m.apply(&Frame::control("user_left"));
        }
        assert_eq!(m.view().counter("active_users"), 0);
        m.apply(&Frame::control("user_joined"));
        assert_eq!(m.view().counter("active_users"), 1);
    }

    #[test]
    fn test_counter_payload_delta_keeps_rule_sign() {
        let mut m = merger();
        m.apply(&Frame::new("user_joined", json!({"delta": 5})));
        assert_eq!(m.view().counter("active_users"), 5);
        let outcome = m.apply(&Frame::new("user_left", json!({"delta": 2})));
        assert_eq!(
            outcome,
            MergeOutcome::Counter {
                key: "active_users".to_string(),
                value: 3
            }
        );
        // A negative payload delta on a join still increments.
        m.apply(&Frame::new("user_joined", json!({"delta": -1})));
        assert_eq!(m.view().counter("active_users"), 4);
    }

    #[test]
    fn test_counter_seeded_by_snapshot() {
        let mut m = merger();
        m.apply_snapshot("stats", &SnapshotTarget::Merge, json!({"active_users": 7}))
            .unwrap();
        m.apply(&Frame::control("user_left"));
        assert_eq!(m.view().get("active_users"), Some(&json!(6)));
    }

    #[test]
    fn test_unknown_type_is_noop() {
        let mut m = merger();
        m.apply(&Frame::new("stats_update", json!({"a": 1})));
        let before = m.view().clone();
        assert_eq!(
            m.apply(&Frame::new("brand_new_type", json!({"a": 2}))),
            MergeOutcome::Ignored
        );
        assert_eq!(m.view(), &before);
        assert!(m.log(LogKind::Activity).is_empty());
        assert!(m.log(LogKind::Events).is_empty());
    }

    #[test]
    fn test_activity_and_event_routing() {
        let mut m = merger();
        m.apply(&Frame::new("activity", json!({"id": 1, "message": "Alice signed up"})));
        m.apply(&Frame::new(
            "notification",
            json!({"id": "n-1", "title": "Deploy finished", "severity": "success"}),
        ));

        let activity = m.log(LogKind::Activity).snapshot();
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].id, "1");
        assert_eq!(activity[0].message, "Alice signed up");
        assert_eq!(activity[0].category, "activity");

        let events = m.log(LogKind::Events).snapshot();
        assert_eq!(events[0].id, "n-1");
        assert_eq!(events[0].severity, Severity::Success);
        assert_eq!(events[0].message, "Deploy finished");
    }

    #[test]
    fn test_derive_entry_timestamp_precedence() {
        let payload = json!({"timestamp": "2021-01-01T00:00:00Z", "message": "m"});
        let from_frame = derive_entry("event", &payload, Some(&json!("2022-06-01T12:00:00+02:00")));
        assert_eq!(from_frame.timestamp.to_rfc3339(), "2022-06-01T10:00:00+00:00");

        let from_payload = derive_entry("event", &payload, None);
        assert_eq!(from_payload.timestamp.to_rfc3339(), "2021-01-01T00:00:00+00:00");

        let millis = derive_entry("event", &json!({"created_at": 0}), Some(&json!("not a date")));
        assert_eq!(millis.timestamp.timestamp(), 0);

        let frame_millis = derive_entry("event", &payload, Some(&json!(1714557600000i64)));
        assert_eq!(frame_millis.timestamp.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_derive_entry_fallback_message() {
        let e = derive_entry("event", &json!({"count": 3}), None);
        assert_eq!(e.message, r#"{"count":3}"#);
        assert_eq!(e.category, "event");
        assert_eq!(e.severity, Severity::Info);

        let bare = derive_entry("new_notification", &Value::Null, None);
        assert_eq!(bare.message, "new_notification");
    }

    #[test]
    fn test_snapshot_key_and_log_targets() {
        let mut m = merger();
        m.apply_snapshot(
            "users",
            &SnapshotTarget::Key("recent_users".to_string()),
            json!([{"email": "a@example.com"}]),
        )
        .unwrap();
        assert_eq!(m.view().get("recent_users"), Some(&json!([{"email": "a@example.com"}])));

        let written = m
            .apply_snapshot(
                "activity",
                &SnapshotTarget::Log(LogKind::Activity),
                json!([{"id": "newest"}, {"id": "middle"}, {"id": "oldest"}]),
            )
            .unwrap();
        assert_eq!(written, 3);
        let ids: Vec<String> = m.log(LogKind::Activity).iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec!["newest", "middle", "oldest"]);
    }

    #[test]
    fn test_numeric_frame_timestamp_sets_entry_time() {
        let mut m = merger();
        let frame = Frame::parse(
            r#"{"type":"activity","payload":{"id":"a-1","timestamp":"2020-01-01T00:00:00Z"},"timestamp":1714557600000}"#,
        )
        .unwrap();
        m.apply(&frame);

        let entry = m.log(LogKind::Activity).latest().unwrap().clone();
        assert_eq!(entry.id, "a-1");
        assert_eq!(entry.timestamp.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_log_snapshot_replaces_previous_feed() {
        let mut m = merger();
        m.apply(&Frame::new("activity", json!({"id": "pushed"})));
        let feed = json!([{"id": "b"}, {"id": "a"}]);
        for _ in 0..3 {
            m.apply_snapshot("activity", &SnapshotTarget::Log(LogKind::Activity), feed.clone())
                .unwrap();
        }
        let ids: Vec<String> = m.log(LogKind::Activity).iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(m.log(LogKind::Activity).evicted(), 0);
    }

    #[test]
    fn test_snapshot_shape_mismatch_leaves_state() {
        let mut m = merger();
        m.apply_snapshot("stats", &SnapshotTarget::Merge, json!({"a": 1})).unwrap();
        let err = m
            .apply_snapshot("activity", &SnapshotTarget::Log(LogKind::Activity), json!({"a": 2}))
            .unwrap_err();
        assert!(matches!(err, SyncError::SnapshotFetch { .. }));
        assert!(m
            .apply_snapshot("stats", &SnapshotTarget::Merge, json!("text"))
            .is_err());
        assert_eq!(m.view().get("a"), Some(&json!(1)));
        assert!(m.log(LogKind::Activity).is_empty());
    }

    #[test]
    fn test_snapshot_failure_entry() {
        let mut m = merger();
        m.record_snapshot_failure("admin_stats", "HTTP 503");
        let events = m.log(LogKind::Events).snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].category, "system");
        assert_eq!(events[0].severity, Severity::Error);
        assert!(events[0].message.contains("admin_stats"));
    }

    #[test]
    fn test_custom_rules_from_config() {
        let config: MergeConfig = serde_json::from_value(json!({
            "update_types": ["kpi"],
            "counters": {"viewer_in": {"key": "viewers", "delta": 1}}
        }))
        .unwrap();
        let mut m = StateMerger::new(MergeRules::from(&config), 5, 5);
        assert_eq!(m.rules().classify("stats_update"), Dispatch::Unknown);
        m.apply(&Frame::new("kpi", json!({"x": 1})));
        m.apply(&Frame::control("viewer_in"));
        assert_eq!(m.view().get("x"), Some(&json!(1)));
        assert_eq!(m.view().counter("viewers"), 1);
        // Default counters were replaced.
        assert_eq!(m.rules().classify("user_joined"), Dispatch::Unknown);
    }
}
