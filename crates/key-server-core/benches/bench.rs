use core::hint::black_box;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use key_server_core::{KeyService, Keys, OsRandom, PrometheusMetrics, encode};
use std::sync::Arc;

const MAX_SIZE: usize = 1024;

fn bench_generate(c: &mut Criterion) {
    let metrics = Arc::new(PrometheusMetrics::new(MAX_SIZE).expect("registry"));
    let service = KeyService::new(OsRandom, metrics, MAX_SIZE);

    let mut group = c.benchmark_group("key_service/generate");
    for length in [16i64, 32, 256, 1024] {
        group.throughput(Throughput::Bytes(length as u64));
        group.bench_with_input(BenchmarkId::from_parameter(length), &length, |b, &len| {
            b.iter(|| black_box(service.generate(black_box(len)).expect("key")));
        });
    }
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encoding/url_safe");
    for length in [16usize, 256, 1024] {
        let bytes = vec![0x5au8; length];
        group.throughput(Throughput::Bytes(length as u64));
        group.bench_with_input(BenchmarkId::from_parameter(length), &bytes, |b, bytes| {
            b.iter(|| black_box(encode(black_box(bytes))));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_generate, bench_encode);
criterion_main!(benches);
