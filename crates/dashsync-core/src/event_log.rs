use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of an event log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    /// Lenient parse; unknown labels are `Info`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "success" | "ok" => Severity::Success,
            "warning" | "warn" => Severity::Warning,
            "error" | "err" | "critical" | "fatal" => Severity::Error,
            _ => Severity::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// One entry of an activity feed or event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub category: String,
    pub severity: Severity,
    pub message: String,
}

impl EventLogEntry {
    pub fn new(
        id: impl Into<String>,
        category: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        EventLogEntry {
            id: id.into(),
            timestamp: Utc::now(),
            category: category.into(),
            severity,
            message: message.into(),
        }
    }

    /// A `system`/`error` entry with a generated id.
    pub fn system_error(message: impl Into<String>) -> Self {
        EventLogEntry::new(
            uuid::Uuid::new_v4().to_string(),
            "system",
            Severity::Error,
            message,
        )
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Fixed-capacity event buffer, newest first.
///
/// Order is insertion order (most recent at index 0), regardless of the
/// entries' own timestamps. Once full, each append evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct BoundedEventLog {
    capacity: usize,
    entries: VecDeque<EventLogEntry>,
    evicted: u64,
}

impl BoundedEventLog {
    pub fn new(capacity: usize) -> Self {
        BoundedEventLog {
            capacity,
            entries: VecDeque::with_capacity(capacity),
            evicted: 0,
        }
    }

    /// Prepend an entry, dropping from the tail past capacity.
    pub fn append(&mut self, entry: EventLogEntry) {
        self.entries.push_front(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_back();
            self.evicted += 1;
        }
    }

    /// Drop every entry. Cleared entries do not count as evicted.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Copy of the current entries, newest first.
    pub fn snapshot(&self) -> Vec<EventLogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&EventLogEntry> {
        self.entries.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventLogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries dropped from the tail so far.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}
