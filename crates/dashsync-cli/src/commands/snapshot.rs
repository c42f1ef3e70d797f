use std::sync::Arc;

use serde_json::json;
use tokio::sync::RwLock;

use dashsync_config::{DashboardConfig, LogKind};
use dashsync_core::{create_metrics, StateMerger};
use dashsync_net::{HttpSnapshotSource, SnapshotLoader};

pub async fn run(config: &DashboardConfig, pretty: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = config.effective();
    if config.snapshot.endpoints.is_empty() {
        return Err("No snapshot endpoints configured".into());
    }

    let source = Arc::new(HttpSnapshotSource::from_config(&config.snapshot)?);
    let loader = SnapshotLoader::from_config(&config.snapshot, source, create_metrics());
    let merger = RwLock::new(StateMerger::from_config(&config));

    let report = loader.fetch_initial(&merger).await;
    let merger = merger.into_inner();

    let failed: Vec<_> = report
        .failed
        .iter()
        .map(|(endpoint, reason)| json!({"endpoint": endpoint, "reason": reason}))
        .collect();
    let output = json!({
        "loaded": report.loaded,
        "failed": failed,
        "view": merger.view(),
        "activity": merger.log(LogKind::Activity).snapshot(),
        "events": merger.log(LogKind::Events).snapshot(),
    });

    let text = if pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{}", text);

    if report.loaded.is_empty() {
        return Err(format!("all {} snapshot endpoint(s) failed", report.failed.len()).into());
    }
    Ok(())
}
