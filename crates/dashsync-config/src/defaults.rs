use crate::types::DashboardConfig;

impl DashboardConfig {
    /// Apply default inference rules to the configuration.
    /// This mutates the config in place.
    pub fn apply_defaults(&mut self) {
        // 1. Endpoint names from their paths
        for endpoint in &mut self.snapshot.endpoints {
            if endpoint.name.as_deref().map_or(true, str::is_empty) {
                endpoint.name = Some(derive_endpoint_name(&endpoint.path));
            }
        }

        // 2. Per-channel pending-send queue size
        for channel in &mut self.channels {
            if channel.pending_send.is_none() {
                channel.pending_send = Some(self.buffers.pending_send);
            }
        }

        // 3. A base URL without trailing slash so paths join cleanly
        if let Some(base) = self.snapshot.base_url.as_mut() {
            let trimmed = base.trim_end_matches('/').len();
            base.truncate(trimmed);
        }
    }

    /// Returns a new config with all defaults applied.
    pub fn effective(&self) -> DashboardConfig {
        let mut config = self.clone();
        config.apply_defaults();
        config
    }
}

/// Derive an endpoint name from its request path.
/// `/admin/stats` -> "admin_stats"
/// `/stats?range=7d` -> "stats"
pub fn derive_endpoint_name(path: &str) -> String {
    let path = path.split('?').next().unwrap_or_default();
    path.trim_start_matches('/')
        .trim_end_matches('/')
        .replace(['/', '-'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChannelConfig, SnapshotEndpointConfig, SnapshotTarget};

    #[test]
    fn test_derive_endpoint_name() {
        assert_eq!(derive_endpoint_name("/admin/stats"), "admin_stats");
        assert_eq!(derive_endpoint_name("/recent-activity/"), "recent_activity");
        assert_eq!(derive_endpoint_name("/stats?range=7d"), "stats");
        assert_eq!(derive_endpoint_name("/"), "");
    }

    #[test]
    fn test_endpoint_name_inference() {
        let mut config = DashboardConfig::default();
        config.snapshot.endpoints.push(SnapshotEndpointConfig {
            name: None,
            path: "/admin/stats".to_string(),
            target: SnapshotTarget::Merge,
        });
        config.snapshot.endpoints.push(SnapshotEndpointConfig {
            name: Some("users".to_string()),
            path: "/admin/users".to_string(),
            target: SnapshotTarget::Key("users".to_string()),
        });

        config.apply_defaults();

        assert_eq!(config.snapshot.endpoints[0].name.as_deref(), Some("admin_stats"));
        assert_eq!(config.snapshot.endpoints[1].name.as_deref(), Some("users"));
    }

    #[test]
    fn test_channel_inherits_pending_send() {
        let mut config = DashboardConfig::default();
        config.buffers.pending_send = 8;
        config.channels.push(ChannelConfig::named("analytics"));
        config.channels.push(ChannelConfig {
            name: "notifications".to_string(),
            pending_send: Some(2),
        });

        config.apply_defaults();

        assert_eq!(config.channels[0].pending_send, Some(8));
        assert_eq!(config.channels[1].pending_send, Some(2));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let mut config = DashboardConfig::default();
        config.snapshot.base_url = Some("http://localhost:3000/api//".to_string());
        let effective = config.effective();
        assert_eq!(
            effective.snapshot.base_url.as_deref(),
            Some("http://localhost:3000/api")
        );
        // The input config is untouched.
        assert!(config.snapshot.base_url.unwrap().ends_with('/'));
    }
}
