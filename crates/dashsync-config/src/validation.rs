use std::collections::{HashMap, HashSet};

use crate::defaults::derive_endpoint_name;
use crate::types::{DashboardConfig, SnapshotTarget, TransportConfig};
use crate::ConfigError;

impl DashboardConfig {
    /// Validate the configuration and return a list of errors.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        // Channel names are unique and non-empty
        let mut seen_channels = HashSet::new();
        for channel in &self.channels {
            if channel.name.trim().is_empty() {
                errors.push(ConfigError::InvalidConfig(
                    "Channel name must not be empty".to_string(),
                ));
            } else if !seen_channels.insert(channel.name.as_str()) {
                errors.push(ConfigError::DuplicateChannel(channel.name.clone()));
            }
            if channel.pending_send == Some(0) {
                errors.push(ConfigError::InvalidConfig(format!(
                    "Channel '{}' has a pending_send queue of size 0",
                    channel.name
                )));
            }
        }

        // Endpoint names are unique, paths are absolute
        let mut seen_endpoints = HashSet::new();
        for endpoint in &self.snapshot.endpoints {
            let name = endpoint
                .name
                .clone()
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| derive_endpoint_name(&endpoint.path));
            if !endpoint.path.starts_with('/') {
                errors.push(ConfigError::InvalidEndpointPath(
                    endpoint.path.clone(),
                    "Endpoint path must start with '/'".to_string(),
                ));
            }
            if !seen_endpoints.insert(name.clone()) {
                errors.push(ConfigError::DuplicateEndpoint(name));
            }
        }

        // Snapshot endpoints write disjoint view-model keys
        let mut key_owners: HashMap<&str, &str> = HashMap::new();
        for endpoint in &self.snapshot.endpoints {
            if let SnapshotTarget::Key(key) = &endpoint.target {
                if let Some(previous) = key_owners.insert(key.as_str(), endpoint.path.as_str()) {
                    errors.push(ConfigError::OverlappingSnapshotKeys(
                        key.clone(),
                        previous.to_string(),
                        endpoint.path.clone(),
                    ));
                }
            }
        }

        if !self.snapshot.endpoints.is_empty() && self.snapshot.base_url.is_none() {
            errors.push(ConfigError::InvalidConfig(
                "snapshot.base_url is required when endpoints are configured".to_string(),
            ));
        }

        if let TransportConfig::Tcp(tcp) = &self.transport {
            if !tcp.address.contains(':') {
                errors.push(ConfigError::InvalidConfig(format!(
                    "TCP transport address '{}' must be host:port",
                    tcp.address
                )));
            }
        }

        // Buffers
        if self.buffers.activity_capacity == 0 {
            errors.push(ConfigError::InvalidConfig(
                "buffers.activity_capacity must be at least 1".to_string(),
            ));
        }
        if self.buffers.event_capacity == 0 {
            errors.push(ConfigError::InvalidConfig(
                "buffers.event_capacity must be at least 1".to_string(),
            ));
        }
        if self.buffers.pending_send == 0 {
            errors.push(ConfigError::InvalidConfig(
                "buffers.pending_send must be at least 1".to_string(),
            ));
        }

        // Reconnect
        let reconnect = &self.reconnect;
        if !(0.0..=1.0).contains(&reconnect.jitter) {
            errors.push(ConfigError::InvalidConfig(format!(
                "reconnect.jitter must be within 0.0..=1.0, got {}",
                reconnect.jitter
            )));
        }
        if let Some(max_delay) = &reconnect.max_delay {
            if max_delay.as_duration() < reconnect.delay.as_duration() {
                errors.push(ConfigError::InvalidConfig(format!(
                    "reconnect.max_delay ({}) is shorter than reconnect.delay ({})",
                    max_delay, reconnect.delay
                )));
            }
        }
        if reconnect.max_attempts == Some(0) {
            errors.push(ConfigError::InvalidConfig(
                "reconnect.max_attempts must be at least 1 (omit it for unlimited)".to_string(),
            ));
        }

        // Merge sets do not overlap
        let merge = &self.merge;
        let mut type_owner: HashMap<&str, &str> = HashMap::new();
        let sets: [(&str, Vec<&str>); 4] = [
            ("update_types", merge.update_types.iter().map(String::as_str).collect()),
            ("activity_types", merge.activity_types.iter().map(String::as_str).collect()),
            ("event_types", merge.event_types.iter().map(String::as_str).collect()),
            ("counters", merge.counters.keys().map(String::as_str).collect()),
        ];
        for (set_name, types) in &sets {
            for frame_type in types {
                if let Some(previous) = type_owner.insert(*frame_type, *set_name) {
                    if previous != *set_name {
                        errors.push(ConfigError::AmbiguousFrameType(
                            frame_type.to_string(),
                            previous.to_string(),
                            set_name.to_string(),
                        ));
                    }
                }
            }
        }
        for (frame_type, rule) in &merge.counters {
            if rule.delta == 0 {
                errors.push(ConfigError::InvalidConfig(format!(
                    "Counter rule '{}' has a zero delta",
                    frame_type
                )));
            }
            if rule.key.is_empty() {
                errors.push(ConfigError::InvalidConfig(format!(
                    "Counter rule '{}' has an empty key",
                    frame_type
                )));
            }
        }

        errors
    }

    /// Validate and return Ok(()) if valid, or Err with the first error.
    pub fn validate_or_err(&self) -> Result<(), ConfigError> {
        match self.validate().into_iter().next() {
            None => Ok(()),
            Some(first) => Err(first),
        }
    }
}
