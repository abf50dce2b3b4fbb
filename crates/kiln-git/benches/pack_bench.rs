//! Pack codec benchmarks for Kiln.
//!
//! Benchmarks:
//! - Pack building at various object counts
//! - Pack parsing into a fresh store
//! - Pkt-line sideband framing

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kiln_git::{Band, PackBuilder, PackParser, PktLineWriter};
use kiln_storage::{GitObject, MemoryAdapter, ObjectStore};
use std::hint::black_box;
use std::sync::Arc;

fn blobs(count: usize) -> Vec<GitObject> {
    (0..count)
        .map(|i| GitObject::blob(format!("line {}\n", i).repeat(32).into_bytes()))
        .collect()
}

fn build_pack(objects: &[GitObject]) -> Vec<u8> {
    let mut builder = PackBuilder::new();
    for object in objects {
        builder.add(object.clone());
    }
    builder.build().unwrap()
}

fn bench_pack_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("pack_build");

    for count in [10, 100, 1_000].iter() {
        let objects = blobs(*count);
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("objects", count), &objects, |b, objects| {
            b.iter(|| black_box(build_pack(objects)));
        });
    }

    group.finish();
}

fn bench_pack_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("pack_parse");

    for count in [10, 100, 1_000].iter() {
        let pack = build_pack(&blobs(*count));
        group.throughput(Throughput::Bytes(pack.len() as u64));
        group.bench_with_input(BenchmarkId::new("objects", count), &pack, |b, pack| {
            b.iter(|| {
                let store = ObjectStore::new(Arc::new(MemoryAdapter::new()));
                black_box(PackParser::new(pack).parse(&store).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_sideband(c: &mut Criterion) {
    let data = vec![7u8; 1 << 20];
    let mut group = c.benchmark_group("sideband");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("frame_1mb", |b| {
        b.iter(|| {
            let mut writer = PktLineWriter::new(Vec::with_capacity(data.len() + 1024));
            writer.write_sideband(Band::Data, &data).unwrap();
            black_box(writer.into_inner())
        });
    });
    group.finish();
}

criterion_group!(benches, bench_pack_build, bench_pack_parse, bench_sideband);
criterion_main!(benches);
