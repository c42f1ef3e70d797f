use std::time::Duration;

use dashsync_core::Frame;
use dashsync_net::ChannelState;
use dashsync_sim::invariants::{check_step_invariants, delivered_seqs};
use dashsync_sim::ops::Op;
use dashsync_sim::{FaultConfig, Sim};
use serde_json::json;

#[tokio::test(start_paused = true)]
async fn sim_seed_42_10_steps() {
    let mut sim = Sim::new(42).await;
    let violations = sim.run(10).await;
    assert!(violations.is_empty(), "{:#?}", violations);
}

#[tokio::test(start_paused = true)]
async fn sim_seed_42_500_steps() {
    let mut sim = Sim::new(42).await;
    let violations = sim.run(500).await;
    assert!(violations.is_empty(), "{:#?}", violations);
}

#[tokio::test(start_paused = true)]
async fn sim_seed_123_1000_steps() {
    let mut sim = Sim::new(123).await;
    let violations = sim.run(1000).await;
    assert!(violations.is_empty(), "{:#?}", violations);
}

#[tokio::test(start_paused = true)]
async fn sim_fuzz_50_seeds() {
    for seed in 0..50 {
        let mut sim = Sim::new(seed).await;
        let violations = sim.run(200).await;
        assert!(violations.is_empty(), "seed {}: {:#?}", seed, violations);
    }
}

#[tokio::test(start_paused = true)]
async fn sim_with_faults_holds_invariants() {
    let config = FaultConfig {
        connect_failure_rate: 0.3,
        snapshot_failure_rate: 0.3,
    };
    for seed in 0..20 {
        let mut sim = Sim::new_with_faults(seed, Some(config.clone())).await;
        let violations = sim.run(300).await.to_vec();
        assert!(violations.is_empty(), "seed {}: {:#?}", seed, violations);
        let stats = sim.fault_stats();
        assert!(
            stats.refused_connects + stats.failed_snapshots > 0,
            "seed {} injected nothing",
            seed
        );
    }
}

#[tokio::test(start_paused = true)]
async fn sim_same_seed_same_trace() {
    let mut a = Sim::new(9).await;
    let mut b = Sim::new(9).await;
    a.run(200).await;
    b.run(200).await;

    let left: Vec<_> = a.trace.iter().map(|t| (&t.op, &t.note)).collect();
    let right: Vec<_> = b.trace.iter().map(|t| (&t.op, &t.note)).collect();
    assert_eq!(left, right);
}

#[tokio::test(start_paused = true)]
async fn sim_detects_divergence() {
    let mut sim = Sim::new(7).await;
    let _ = sim.run(20).await;

    // Feed the model a frame the coordinator never saw.
    sim.oracle
        .apply(&Frame::new("stats_update", json!({"rogue": true})));

    let violations = check_step_invariants(
        sim.step,
        &sim.coordinator,
        &sim.transport,
        &sim.oracle,
        sim.sends_accepted(),
    )
    .await;
    assert!(
        violations.iter().any(|v| v.invariant == "view-model-match"),
        "{:#?}",
        violations
    );
}

#[tokio::test(start_paused = true)]
async fn sim_scripted_outage_and_flush() {
    let mut sim = Sim::new(1).await;
    assert_eq!(
        sim.coordinator.channel_state("analytics").unwrap(),
        ChannelState::Open
    );

    let v = sim
        .step_with(Op::Push {
            channel: "analytics".to_string(),
            frame: Frame::new("stats_update", json!({"total_users": 5})),
        })
        .await;
    assert!(v.is_empty(), "{:#?}", v);
    assert_eq!(
        sim.coordinator.view_model().await.get("total_users"),
        Some(&json!(5))
    );

    let v = sim
        .step_with(Op::Disconnect {
            channel: "analytics".to_string(),
        })
        .await;
    assert!(v.is_empty(), "{:#?}", v);
    assert_eq!(
        sim.coordinator.channel_state("analytics").unwrap(),
        ChannelState::WaitingToRetry
    );

    // Pushes during the outage go nowhere.
    sim.step_with(Op::Push {
        channel: "analytics".to_string(),
        frame: Frame::new("stats_update", json!({"total_users": 99})),
    })
    .await;

    for seq in 1..=6 {
        let v = sim
            .step_with(Op::Send {
                channel: "analytics".to_string(),
                seq,
            })
            .await;
        assert!(v.is_empty(), "{:#?}", v);
    }
    assert!(delivered_seqs(&sim.transport, "analytics").is_empty());

    let v = sim.step_with(Op::Advance(Duration::from_secs(3))).await;
    assert!(v.is_empty(), "{:#?}", v);
    assert_eq!(
        sim.coordinator.channel_state("analytics").unwrap(),
        ChannelState::Open
    );
    assert_eq!(
        delivered_seqs(&sim.transport, "analytics"),
        vec![3, 4, 5, 6]
    );
    assert_eq!(sim.coordinator.metrics().frames_dropped, 2);
    assert_eq!(
        sim.coordinator.view_model().await.get("total_users"),
        Some(&json!(5))
    );

    let violations = sim.run(0).await;
    assert!(violations.is_empty(), "{:#?}", violations);
}

#[tokio::test(start_paused = true)]
async fn sim_scripted_refresh_and_counters() {
    let mut sim = Sim::new(2).await;
    assert_eq!(sim.coordinator.view_model().await.counter("active_users"), 3);

    for _ in 0..5 {
        let v = sim
            .step_with(Op::Push {
                channel: "notifications".to_string(),
                frame: Frame::control("user_left"),
            })
            .await;
        assert!(v.is_empty(), "{:#?}", v);
    }
    assert_eq!(sim.coordinator.view_model().await.counter("active_users"), 0);

    let v = sim.step_with(Op::Refresh).await;
    assert!(v.is_empty(), "{:#?}", v);
    let refreshes = sim
        .transport
        .sent("analytics")
        .iter()
        .filter(|t| t.contains("refresh_stats"))
        .count();
    assert_eq!(refreshes, 1);

    let v = sim
        .step_with(Op::PushMalformed {
            channel: "analytics".to_string(),
            text: "{bad json".to_string(),
        })
        .await;
    assert!(v.is_empty(), "{:#?}", v);
    assert_eq!(sim.coordinator.metrics().frames_malformed, 1);
}
