// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the payload codec on the relay path and for
// building discovery sweep plans.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use printrelay_core::codec;
use printrelay_core::config::DiscoveryConfig;
use printrelay_print::discovery::SweepPlan;

/// A receipt-sized ESC/POS stream: init, text lines, feed and cut.
fn receipt_bytes(lines: usize) -> Vec<u8> {
    let mut buf = vec![0x1B, 0x40];
    for i in 0..lines {
        buf.extend_from_slice(format!("Item {i:04}  Repair labour      12.50\n").as_bytes());
    }
    buf.extend_from_slice(&[0x1B, 0x64, 0x04, 0x1D, 0x56, 0x00]);
    buf
}

/// Benchmark decoding base64 payloads as the relay does on every request.
fn bench_decode_payload(c: &mut Criterion) {
    let small = codec::encode(&receipt_bytes(40));
    c.bench_function("decode_payload (receipt)", |b| {
        b.iter(|| {
            let bytes = codec::decode(black_box(&small));
            assert!(bytes.is_ok());
        });
    });

    // A logo-heavy job close to the bridge ceiling.
    let large = codec::encode(&vec![0xAAu8; 8 * 1024 * 1024]);
    c.bench_function("decode_payload (8 MiB raster)", |b| {
        b.iter(|| {
            let bytes = codec::decode(black_box(&large));
            black_box(bytes.ok());
        });
    });
}

/// Benchmark encoding, the client-side half of the text-safe boundary.
fn bench_encode_payload(c: &mut Criterion) {
    let data = receipt_bytes(40);
    c.bench_function("encode_payload (receipt)", |b| {
        b.iter(|| black_box(codec::encode(black_box(&data))));
    });
}

/// Benchmark building and walking the default sweep plan.
fn bench_sweep_plan(c: &mut Criterion) {
    let config = DiscoveryConfig::default();
    c.bench_function("sweep_plan (defaults)", |b| {
        b.iter(|| {
            let plan = SweepPlan::new(black_box(&config), None).unwrap();
            black_box(plan.hosts().count());
        });
    });
}

criterion_group!(
    benches,
    bench_decode_payload,
    bench_encode_payload,
    bench_sweep_plan,
);
criterion_main!(benches);
