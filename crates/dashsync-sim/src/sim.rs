use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{json, Value};

use dashsync_config::{
    ChannelConfig, DashboardConfig, LogKind, SnapshotConfig, SnapshotEndpointConfig,
    SnapshotTarget,
};
use dashsync_core::{Frame, SnapshotSource, Transport};
use dashsync_net::{DashboardSyncCoordinator, MemorySnapshotSource, MemoryTransport, SnapshotReport};

use crate::fault::{FaultConfig, FaultDice, FaultStats, FaultySnapshotSource, FaultyTransport};
use crate::invariants::{check_step_invariants, check_stopped, Violation, CLIENT_PING};
use crate::ops::{generate, Op, OpState, CHANNELS};
use crate::oracle::Oracle;

const STATS_PATH: &str = "/stats";
const ACTIVITY_PATH: &str = "/activity";
const PENDING_SEND: usize = 4;

/// A single operation captured during simulation.
#[derive(Debug, Clone)]
pub struct SimTraceEntry {
    pub step: usize,
    pub op: String,
    pub note: Option<String>,
}

/// The base configuration every simulation runs with.
pub fn sim_config() -> DashboardConfig {
    let mut config = DashboardConfig {
        name: Some("sim".to_string()),
        snapshot: SnapshotConfig {
            base_url: Some("http://sim.invalid".to_string()),
            endpoints: vec![
                SnapshotEndpointConfig {
                    name: Some("stats".to_string()),
                    path: STATS_PATH.to_string(),
                    target: SnapshotTarget::Merge,
                },
                SnapshotEndpointConfig {
                    name: Some("activity".to_string()),
                    path: ACTIVITY_PATH.to_string(),
                    target: SnapshotTarget::Log(LogKind::Activity),
                },
            ],
            ..Default::default()
        },
        channels: CHANNELS.iter().map(|c| ChannelConfig::named(*c)).collect(),
        ..Default::default()
    };
    config.buffers.activity_capacity = 20;
    config.buffers.event_capacity = 50;
    config.buffers.pending_send = PENDING_SEND;
    config
}

/// The main simulation harness.
///
/// Runs a real [`DashboardSyncCoordinator`] over in-memory fakes and checks
/// it against an [`Oracle`] after every step. Expects a paused tokio clock.
pub struct Sim {
    pub rng: ChaCha8Rng,
    pub step: usize,
    pub coordinator: DashboardSyncCoordinator,
    pub transport: MemoryTransport,
    pub source: Arc<MemorySnapshotSource>,
    pub oracle: Oracle,
    pub op_state: OpState,
    pub violations: Vec<Violation>,
    pub trace: Vec<SimTraceEntry>,
    /// Whether fault injection is active.
    pub has_faults: bool,
    faulty_transport: Arc<FaultyTransport>,
    faulty_source: Arc<FaultySnapshotSource>,
    snapshot_data: HashMap<String, Value>,
    sends_accepted: u64,
}

impl Sim {
    /// Create a new deterministic simulation with the given seed.
    pub async fn new(seed: u64) -> Self {
        Self::new_with_faults(seed, None).await
    }

    /// Create a new deterministic simulation with optional fault injection.
    pub async fn new_with_faults(seed: u64, fault_config: Option<FaultConfig>) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(seed);
        let dice = FaultDice::new(ChaCha8Rng::seed_from_u64(seed.wrapping_add(0x5eed)));
        let has_faults = fault_config.is_some();
        let faults = fault_config.unwrap_or_default();

        let transport = MemoryTransport::new();
        let faulty_transport = Arc::new(FaultyTransport::new(
            Arc::new(transport.clone()),
            dice.clone(),
            &faults,
        ));

        let source = Arc::new(MemorySnapshotSource::new());
        let mut snapshot_data = HashMap::new();
        let stats = json!({"total_users": 100, "revenue": 0, "active_users": 3});
        let activity = json!([
            {"id": "seed-2", "message": "second", "timestamp": "2024-01-01T00:00:02Z"},
            {"id": "seed-1", "message": "first", "timestamp": "2024-01-01T00:00:01Z"},
        ]);
        source.respond(STATS_PATH, stats.clone());
        source.respond(ACTIVITY_PATH, activity.clone());
        snapshot_data.insert("stats".to_string(), stats);
        snapshot_data.insert("activity".to_string(), activity);

        let faulty_source = Arc::new(FaultySnapshotSource::new(
            source.clone() as Arc<dyn SnapshotSource>,
            dice,
            &faults,
        ));

        let config = sim_config();
        let coordinator = DashboardSyncCoordinator::new(
            &config,
            faulty_transport.clone() as Arc<dyn Transport>,
            faulty_source.clone() as Arc<dyn SnapshotSource>,
        );

        let mut sim = Sim {
            rng,
            step: 0,
            coordinator,
            transport,
            source,
            oracle: Oracle::new(&config),
            op_state: OpState::default(),
            violations: Vec::new(),
            trace: Vec::new(),
            has_faults,
            faulty_transport,
            faulty_source,
            snapshot_data,
            sends_accepted: 0,
        };

        match sim.coordinator.start().await {
            Ok(report) => sim.mirror_snapshot(&report),
            Err(e) => sim.violations.push(Violation {
                step: 0,
                invariant: "start".to_string(),
                details: e.to_string(),
            }),
        }
        settle().await;
        sim
    }

    /// Run the simulation for the given number of steps, then stop and run
    /// the shutdown checks.
    pub async fn run(&mut self, steps: usize) -> &[Violation] {
        for _ in 0..steps {
            let op = generate(&mut self.rng, &mut self.op_state, self.step);
            let _ = self.step_with(op).await;
        }
        self.finish().await;
        &self.violations
    }

    /// Execute a single operation and return any violations found for that step.
    pub async fn step_with(&mut self, op: Op) -> Vec<Violation> {
        let note = self.execute(&op).await;
        settle().await;

        self.trace.push(SimTraceEntry {
            step: self.step,
            op: format!("{:?}", op),
            note,
        });

        let new_violations = check_step_invariants(
            self.step,
            &self.coordinator,
            &self.transport,
            &self.oracle,
            self.sends_accepted,
        )
        .await;
        self.violations.extend(new_violations.iter().cloned());
        self.step += 1;
        new_violations
    }

    async fn execute(&mut self, op: &Op) -> Option<String> {
        match op {
            Op::Push { channel, frame } => {
                if self.transport.push_frame(channel, frame) {
                    self.oracle.apply(frame);
                    None
                } else {
                    Some("not connected".to_string())
                }
            }
            Op::PushMalformed { channel, text } => {
                let delivered = self.transport.push(channel, text.clone());
                (!delivered).then(|| "not connected".to_string())
            }
            Op::Disconnect { channel } => {
                self.transport.disconnect(channel, Some("server restart"));
                None
            }
            Op::Fail { channel } => {
                self.transport.fail(channel, "connection reset");
                None
            }
            Op::Send { channel, seq } => {
                let frame = Frame::new(CLIENT_PING, json!({ "seq": seq }));
                match self.coordinator.send(channel, &frame).await {
                    Ok(status) => {
                        self.sends_accepted += 1;
                        Some(format!("{:?}", status))
                    }
                    Err(e) => {
                        self.violations.push(Violation {
                            step: self.step,
                            invariant: "send-accepted".to_string(),
                            details: e.to_string(),
                        });
                        Some(e.to_string())
                    }
                }
            }
            Op::Refresh => {
                let stats = json!({
                    "total_users": self.rng.gen_range(0..10_000),
                    "revenue": self.rng.gen_range(0..1_000_000),
                });
                self.source.respond(STATS_PATH, stats.clone());
                self.snapshot_data.insert("stats".to_string(), stats);

                match self.coordinator.manual_refresh().await {
                    Ok(report) => {
                        self.mirror_snapshot(&report.snapshot);
                        Some(format!("refreshed {:?}", report.refreshed_channels))
                    }
                    Err(e) => Some(e.to_string()),
                }
            }
            Op::Advance(by) => {
                tokio::time::sleep(*by).await;
                None
            }
        }
    }

    fn mirror_snapshot(&mut self, report: &SnapshotReport) {
        self.oracle.apply_snapshot(report, &self.snapshot_data);
    }

    /// Stop the coordinator and verify nothing reconnects afterwards.
    pub async fn finish(&mut self) {
        let connects: Vec<u32> = CHANNELS
            .iter()
            .map(|c| self.transport.connect_count(c))
            .collect();
        self.coordinator.stop().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        let final_violations = check_stopped(self.step, &self.coordinator, &self.transport, &connects);
        self.violations.extend(final_violations);
    }

    /// Accepted client sends so far.
    pub fn sends_accepted(&self) -> u64 {
        self.sends_accepted
    }

    /// Get fault injection statistics.
    pub fn fault_stats(&self) -> FaultStats {
        FaultStats {
            refused_connects: self.faulty_transport.refused(),
            failed_snapshots: self.faulty_source.failed(),
        }
    }
}

/// Let every ready task run before the next operation.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
