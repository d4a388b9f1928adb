//! Benchmark for the score sealing hot path.
//!
//! TARGET: sealing must fit comfortably inside one 16ms frame
//!
//! Run with: cargo bench --package oroboros_integrity --bench codec_benchmark

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use oroboros_integrity::anti_cheat::ProtectedValue;
use oroboros_integrity::codec::{FrameStats, InputKind, ScoreIntegrityCodec, ScoreTrail};
use oroboros_integrity::ManualClock;

fn create_codec() -> ScoreIntegrityCodec {
    let clock = ManualClock::new(1_700_000_000_000);
    let mut codec = ScoreIntegrityCodec::new(clock.shared(), "bench-device");
    codec
        .initialize(&STANDARD.encode([7u8; 32]), &STANDARD.encode([9u8; 32]), "bench-match")
        .expect("valid bench keys");
    for score in (0..500).map(|i| i * 10) {
        codec.record_score_update(score);
        codec.record_input_event(InputKind::Tap, Some(&[1, 2, 3, 4]));
    }
    codec
}

fn bench_encrypt_score(c: &mut Criterion) {
    let mut codec = create_codec();
    let frames = FrameStats { frame_count: 36_000, average_fps: 60.0 };

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Elements(1));

    group.bench_function("encrypt_score", |b| {
        b.iter(|| {
            let integrity = codec.build_integrity(black_box(4_990), frames);
            codec.encrypt_score(black_box(4_990), &integrity)
        });
    });

    let integrity = codec.build_integrity(4_990, frames);
    let payload = codec.encrypt_score(4_990, &integrity).expect("seal");
    group.bench_function("verify_signature", |b| {
        b.iter(|| codec.verify_signature(black_box(&payload)));
    });
    group.bench_function("open_payload", |b| {
        b.iter(|| codec.open_payload(black_box(&payload)));
    });

    group.finish();
}

fn bench_trail(c: &mut Criterion) {
    let mut group = c.benchmark_group("trail");
    group.throughput(Throughput::Elements(1_000));

    group.bench_function("record_1000_updates", |b| {
        b.iter(|| {
            let mut trail = ScoreTrail::new();
            for i in 0..1_000u64 {
                trail.record(i * 16, black_box(i as i64 * 5));
            }
            trail
        });
    });

    group.finish();
}

fn bench_protected_value(c: &mut Criterion) {
    let mut score = ProtectedValue::new(0i64);

    c.bench_function("protected_set_verify", |b| {
        let mut next = 0i64;
        b.iter(|| {
            next += 1;
            score.set(black_box(next));
            score.verify()
        });
    });
}

criterion_group!(benches, bench_encrypt_score, bench_trail, bench_protected_value);
criterion_main!(benches);
