//! Benchmarks for class-specific descriptor parsing
//!
//! Measures parsing cost for:
//! - A minimal compatible stream
//! - Streams with many specializations
//! - Streams padded with QoS / metadata entries

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use protocol::parse_class_descriptors;

fn build_stream(specializations: usize, padding_entries: usize) -> Vec<u8> {
    let mut buffer = vec![0x05, 0x14, 0x00, 0x01, 0x00];

    for i in 0..padding_entries {
        buffer.extend_from_slice(&[0x06, 0x22, i as u8, 0x00, 0x00, 0x00]);
    }

    buffer.push((4 + 2 * specializations) as u8);
    buffer.extend_from_slice(&[0x10, 0x00, specializations as u8]);
    for i in 0..specializations {
        buffer.extend_from_slice(&(0x1000u16 + i as u16).to_le_bytes());
    }

    buffer
}

fn benchmark_minimal(c: &mut Criterion) {
    let buffer = build_stream(1, 0);
    c.bench_function("parse_minimal", |b| {
        b.iter(|| parse_class_descriptors(black_box(&buffer)))
    });
}

fn benchmark_specializations(c: &mut Criterion) {
    let mut group = c.benchmark_group("specializations");

    // bLength is a single byte, so at most 125 codes fit in one entry
    for count in [1usize, 16, 64, 125] {
        let buffer = build_stream(count, 0);
        group.throughput(Throughput::Bytes(buffer.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &buffer, |b, buffer| {
            b.iter(|| parse_class_descriptors(black_box(buffer)))
        });
    }

    group.finish();
}

fn benchmark_padding(c: &mut Criterion) {
    let mut group = c.benchmark_group("padding_entries");

    for padding in [0usize, 8, 40] {
        let buffer = build_stream(4, padding);
        group.throughput(Throughput::Bytes(buffer.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(padding),
            &buffer,
            |b, buffer| b.iter(|| parse_class_descriptors(black_box(buffer))),
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_minimal,
    benchmark_specializations,
    benchmark_padding
);
criterion_main!(benches);
