use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::json;

use dashsync_core::Frame;

pub const CHANNELS: [&str; 2] = ["analytics", "notifications"];

const STAT_KEYS: [&str; 4] = ["total_users", "revenue", "visits", "conversion"];

/// An operation the simulation can perform.
#[derive(Debug, Clone)]
pub enum Op {
    /// Server pushes a well-formed frame.
    Push { channel: String, frame: Frame },
    /// Server pushes a line that is not a frame.
    PushMalformed { channel: String, text: String },
    /// Server closes the link cleanly.
    Disconnect { channel: String },
    /// The link fails.
    Fail { channel: String },
    /// Client sends a sequenced frame.
    Send { channel: String, seq: u64 },
    /// Manual refresh.
    Refresh,
    /// Let virtual time pass.
    Advance(Duration),
}

/// Per-run counters used to build unique ids and sequence numbers.
#[derive(Debug, Clone, Default)]
pub struct OpState {
    pub next_id: u64,
    pub next_seq: u64,
}

fn pick_channel<R: Rng>(rng: &mut R) -> String {
    CHANNELS.choose(rng).copied().unwrap_or("analytics").to_string()
}

/// Stable timestamp so entries compare equal across models.
fn timestamp(step: usize) -> String {
    format!("2024-01-01T00:{:02}:{:02}Z", (step / 60) % 60, step % 60)
}

fn random_frame<R: Rng>(rng: &mut R, state: &mut OpState, step: usize) -> Frame {
    state.next_id += 1;
    let id = state.next_id;
    let roll: u32 = rng.gen_range(0..100);
    match roll {
        0..=34 => {
            let mut payload = serde_json::Map::new();
            for key in STAT_KEYS {
                if rng.gen_bool(0.5) {
                    payload.insert(key.to_string(), json!(rng.gen_range(0..10_000)));
                }
            }
            Frame::new("stats_update", payload.into())
        }
        35..=49 => Frame::new(
            "activity",
            json!({"id": format!("a-{}", id), "message": format!("activity {}", id)}),
        )
        .with_timestamp(timestamp(step)),
        50..=64 => Frame::new(
            "notification",
            json!({"id": format!("n-{}", id), "title": "Notice", "severity": "warning"}),
        )
        .with_timestamp(timestamp(step)),
        65..=76 => Frame::control("user_joined"),
        77..=91 => Frame::control("user_left"),
        _ => Frame::new("from_a_newer_server", json!({"total_users": -1})),
    }
}

/// Generate a random operation.
pub fn generate<R: Rng>(rng: &mut R, state: &mut OpState, step: usize) -> Op {
    // Weights: Push 55%, Malformed 5%, Disconnect 8%, Fail 4%, Send 12%, Refresh 4%, Advance 12%
    let roll: u32 = rng.gen_range(0..100);
    match roll {
        0..=54 => Op::Push {
            channel: pick_channel(rng),
            frame: random_frame(rng, state, step),
        },
        55..=59 => Op::PushMalformed {
            channel: pick_channel(rng),
            text: ["{bad json", "[]", "{\"payload\":{}}", "null"]
                .choose(rng)
                .copied()
                .unwrap_or("{bad json")
                .to_string(),
        },
        60..=67 => Op::Disconnect {
            channel: pick_channel(rng),
        },
        68..=71 => Op::Fail {
            channel: pick_channel(rng),
        },
        72..=83 => {
            state.next_seq += 1;
            Op::Send {
                channel: pick_channel(rng),
                seq: state.next_seq,
            }
        }
        84..=87 => Op::Refresh,
        _ => Op::Advance(Duration::from_millis(rng.gen_range(100..5_000))),
    }
}
