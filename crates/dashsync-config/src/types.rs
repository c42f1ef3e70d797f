use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reconnect delay growth between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every attempt
    #[default]
    Fixed,
    /// Delay grows by the base delay each attempt
    Linear,
    /// Delay doubles each attempt
    Exponential,
}

/// Which bounded event log an entry lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    /// User-facing activity feed
    #[default]
    Activity,
    /// Raw event stream, also receives system errors
    Events,
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogKind::Activity => write!(f, "activity"),
            LogKind::Events => write!(f, "events"),
        }
    }
}

/// Human-readable duration (e.g., "200ms", "3s", "5m").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HumanDuration(pub std::time::Duration);

impl Default for HumanDuration {
    fn default() -> Self {
        HumanDuration(std::time::Duration::from_secs(0))
    }
}

impl HumanDuration {
    pub fn from_millis(ms: u64) -> Self {
        HumanDuration(std::time::Duration::from_millis(ms))
    }

    pub fn from_secs(secs: u64) -> Self {
        HumanDuration(std::time::Duration::from_secs(secs))
    }

    pub fn as_duration(&self) -> std::time::Duration {
        self.0
    }
}

impl FromStr for HumanDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();

        let (num_str, unit) = if let Some(n) = s.strip_suffix("ms") {
            (n, "ms")
        } else if let Some(n) = s.strip_suffix('s') {
            (n, "s")
        } else if let Some(n) = s.strip_suffix('m') {
            (n, "m")
        } else if let Some(n) = s.strip_suffix('h') {
            (n, "h")
        } else {
            return Err(format!("Invalid duration format: {}", s));
        };

        let num: u64 = num_str
            .trim()
            .parse()
            .map_err(|_| format!("Invalid number in duration: {}", s))?;

        let duration = match unit {
            "ms" => std::time::Duration::from_millis(num),
            "s" => std::time::Duration::from_secs(num),
            "m" => std::time::Duration::from_secs(num * 60),
            _ => std::time::Duration::from_secs(num * 3600),
        };

        Ok(HumanDuration(duration))
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self.0.as_millis();

        if millis % 1000 != 0 || millis == 0 {
            write!(f, "{}ms", millis)
        } else if millis % 3_600_000 == 0 {
            write!(f, "{}h", millis / 3_600_000)
        } else if millis % 60_000 == 0 {
            write!(f, "{}m", millis / 60_000)
        } else {
            write!(f, "{}s", millis / 1000)
        }
    }
}

impl Serialize for HumanDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        HumanDuration::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Newline-delimited JSON over TCP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpTransportConfig {
    /// `host:port` of the push server.
    pub address: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: HumanDuration,
}

fn default_connect_timeout() -> HumanDuration {
    HumanDuration::from_secs(5)
}

/// Tagged enum for push transport configurations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    Tcp(TcpTransportConfig),
    /// In-process transport, used by tests and dry runs.
    #[default]
    Memory,
}

/// Where the `data` of one snapshot endpoint goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotTarget {
    /// Shallow-merge the object's top-level fields into the view model.
    #[default]
    Merge,
    /// Store the whole value under one view-model key.
    Key(String),
    /// Seed an event log from an array of entries.
    Log(LogKind),
}

/// One read endpoint of the snapshot REST surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEndpointConfig {
    /// Name used in logs and synthetic error entries. Derived from the path when absent.
    #[serde(default)]
    pub name: Option<String>,
    pub path: String,
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub target: SnapshotTarget,
}

/// Snapshot fetch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_snapshot_timeout")]
    pub timeout: HumanDuration,
    #[serde(default, skip_serializing)]
    pub bearer_token: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<SnapshotEndpointConfig>,
}

fn default_snapshot_timeout() -> HumanDuration {
    HumanDuration::from_secs(10)
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        SnapshotConfig {
            base_url: None,
            timeout: default_snapshot_timeout(),
            bearer_token: None,
            endpoints: Vec::new(),
        }
    }
}

/// One logical push channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    /// Pending-send queue size; inherits `buffers.pending_send` when absent.
    #[serde(default)]
    pub pending_send: Option<usize>,
}

impl ChannelConfig {
    pub fn named(name: impl Into<String>) -> Self {
        ChannelConfig {
            name: name.into(),
            pending_send: None,
        }
    }
}

/// Reconnect policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default)]
    pub strategy: BackoffStrategy,
    #[serde(default = "default_reconnect_delay")]
    pub delay: HumanDuration,
    #[serde(default)]
    pub max_delay: Option<HumanDuration>,
    /// Give up after this many consecutive failed attempts. Unlimited when absent.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Proportional jitter in `0.0..=1.0`.
    #[serde(default)]
    pub jitter: f64,
}

fn default_reconnect_delay() -> HumanDuration {
    HumanDuration::from_secs(3)
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            strategy: BackoffStrategy::default(),
            delay: default_reconnect_delay(),
            max_delay: None,
            max_attempts: None,
            jitter: 0.0,
        }
    }
}

/// Buffer sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "default_activity_capacity")]
    pub activity_capacity: usize,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default = "default_pending_send")]
    pub pending_send: usize,
}

fn default_activity_capacity() -> usize {
    20
}

fn default_event_capacity() -> usize {
    50
}

fn default_pending_send() -> usize {
    100
}

impl Default for BufferConfig {
    fn default() -> Self {
        BufferConfig {
            activity_capacity: default_activity_capacity(),
            event_capacity: default_event_capacity(),
            pending_send: default_pending_send(),
        }
    }
}

/// Signed adjustment of one numeric view-model key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRule {
    pub key: String,
    pub delta: i64,
}

/// Frame-type dispatch sets for the state merger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    #[serde(default = "default_update_types")]
    pub update_types: Vec<String>,
    #[serde(default = "default_activity_types")]
    pub activity_types: Vec<String>,
    #[serde(default = "default_event_types")]
    pub event_types: Vec<String>,
    #[serde(default = "default_counters")]
    pub counters: IndexMap<String, CounterRule>,
}

fn default_update_types() -> Vec<String> {
    ["stats_update", "snapshot", "analytics_update", "metrics_update"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_activity_types() -> Vec<String> {
    vec!["activity".to_string(), "new_activity".to_string()]
}

fn default_event_types() -> Vec<String> {
    ["event", "notification", "new_notification"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_counters() -> IndexMap<String, CounterRule> {
    let mut counters = IndexMap::new();
    counters.insert(
        "user_joined".to_string(),
        CounterRule {
            key: "active_users".to_string(),
            delta: 1,
        },
    );
    counters.insert(
        "user_left".to_string(),
        CounterRule {
            key: "active_users".to_string(),
            delta: -1,
        },
    );
    counters
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            update_types: default_update_types(),
            activity_types: default_activity_types(),
            event_types: default_event_types(),
            counters: default_counters(),
        }
    }
}

/// Top-level dashboard sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DashboardConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub buffers: BufferConfig,
    #[serde(default)]
    pub merge: MergeConfig,
}
