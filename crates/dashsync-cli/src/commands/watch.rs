use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::info;

use dashsync_config::DashboardConfig;
use dashsync_core::SnapshotSource;
use dashsync_net::{
    transport_from_config, DashboardSyncCoordinator, HttpSnapshotSource, MemorySnapshotSource,
};

pub struct WatchArgs {
    /// Stop on its own after this long.
    pub duration: Option<Duration>,
    pub interval: Duration,
    pub json: bool,
}

pub async fn run(config: &DashboardConfig, args: WatchArgs) -> Result<(), Box<dyn std::error::Error>> {
    config.validate_or_err()?;
    let config = config.effective();

    let transport = transport_from_config(&config.transport);
    let source: Arc<dyn SnapshotSource> = match config.snapshot.base_url {
        Some(_) => Arc::new(HttpSnapshotSource::from_config(&config.snapshot)?),
        // Validation guarantees there are no endpoints to fetch.
        None => Arc::new(MemorySnapshotSource::new()),
    };
    let coordinator = DashboardSyncCoordinator::new(&config, transport, source);

    let report = coordinator.start().await?;
    for (endpoint, reason) in &report.failed {
        emit(&args, json!({"snapshot_failed": endpoint, "reason": reason}), || {
            format!("snapshot {} failed: {}", endpoint, reason)
        });
    }
    if !args.json {
        println!(
            "Loaded {} snapshot endpoint(s), watching {} channel(s)",
            report.loaded.len(),
            config.channels.len()
        );
        println!("Press Ctrl+C to stop");
        println!();
    }

    // One task per channel prints its state transitions.
    let mut watchers = Vec::new();
    for channel in &config.channels {
        let mut rx = coordinator.subscribe_state(&channel.name)?;
        let name = channel.name.clone();
        let json_output = args.json;
        watchers.push(tokio::spawn(async move {
            loop {
                let state = *rx.borrow_and_update();
                if json_output {
                    println!("{}", json!({"channel": name, "state": state.to_string()}));
                } else {
                    println!("[{}] {}: {}", now(), name, state);
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }));
    }

    let deadline = async {
        match args.duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut ticker = tokio::time::interval(args.interval);
    let mut last_view = serde_json::Value::Null;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            _ = &mut deadline => break,
            _ = ticker.tick() => {
                let view = coordinator.view_model().await.to_json();
                if view != last_view {
                    emit(&args, json!({"view": view}), || format!("view: {}", view));
                    last_view = view;
                }
            }
        }
    }

    coordinator.stop().await;
    for watcher in watchers {
        watcher.abort();
    }

    let metrics = serde_json::to_value(coordinator.metrics())?;
    if args.json {
        println!("{}", json!({ "metrics": metrics }));
    } else {
        println!();
        println!("{}", serde_json::to_string_pretty(&metrics)?);
    }
    Ok(())
}

fn emit(args: &WatchArgs, value: serde_json::Value, text: impl FnOnce() -> String) {
    if args.json {
        println!("{}", value);
    } else {
        println!("[{}] {}", now(), text());
    }
}

fn now() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}
