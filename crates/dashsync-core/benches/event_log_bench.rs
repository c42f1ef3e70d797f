use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

use dashsync_core::{BoundedEventLog, EventLogEntry, Frame, MergeRules, Severity, StateMerger};

fn event_log_append_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_log_append");

    for capacity in [20usize, 50, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, &cap| {
            let mut log = BoundedEventLog::new(cap);
            let entry = EventLogEntry::new("1", "activity", Severity::Info, "user signed up");
            b.iter(|| {
                log.append(black_box(entry.clone()));
            });
        });
    }

    group.finish();
}

fn event_log_snapshot_benchmark(c: &mut Criterion) {
    let mut log = BoundedEventLog::new(50);
    for i in 0..50 {
        log.append(EventLogEntry::new(
            i.to_string(),
            "event",
            Severity::Info,
            format!("event {}", i),
        ));
    }

    c.bench_function("event_log_snapshot_50", |b| {
        b.iter(|| black_box(log.snapshot()));
    });
}

fn merger_apply_benchmark(c: &mut Criterion) {
    let stats = Frame::new(
        "stats_update",
        json!({"total_users": 1200, "active_users": 48, "revenue": 9120.5, "conversion": 0.031}),
    );
    let activity = Frame::new(
        "activity",
        json!({"id": "a-1", "message": "New signup", "timestamp": "2024-05-01T10:00:00Z"}),
    );
    let presence = Frame::control("user_joined");

    c.bench_function("merger_apply_stats_update", |b| {
        let mut merger = StateMerger::new(MergeRules::default(), 20, 50);
        b.iter(|| black_box(merger.apply(black_box(&stats))));
    });

    c.bench_function("merger_apply_activity", |b| {
        let mut merger = StateMerger::new(MergeRules::default(), 20, 50);
        b.iter(|| black_box(merger.apply(black_box(&activity))));
    });

    c.bench_function("merger_apply_counter", |b| {
        let mut merger = StateMerger::new(MergeRules::default(), 20, 50);
        b.iter(|| black_box(merger.apply(black_box(&presence))));
    });
}

fn frame_parse_benchmark(c: &mut Criterion) {
    let text = r#"{"type":"stats_update","payload":{"total_users":1200,"revenue":9120.5},"timestamp":"2024-05-01T10:00:00Z"}"#;

    c.bench_function("frame_parse", |b| {
        b.iter(|| Frame::parse(black_box(text)));
    });
}

criterion_group!(
    benches,
    event_log_append_benchmark,
    event_log_snapshot_benchmark,
    merger_apply_benchmark,
    frame_parse_benchmark,
);
criterion_main!(benches);
